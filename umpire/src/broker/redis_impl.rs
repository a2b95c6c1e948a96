//! [`Broker`] implementation over Redis streams.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamPendingCountReply, StreamPendingReply, StreamReadOptions,
    StreamReadReply,
};
use redis::{from_redis_value, AsyncCommands, RedisError, Value};

use super::{Broker, Delivery, Error, PendingEntry, PendingSummary};

/// Stream-group broker backed by a shared Redis connection pool.
///
/// The underlying [`ConnectionManager`] multiplexes and reconnects, so
/// clones of this handle are cheap and safe to use concurrently.
#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
}

impl RedisBroker {
    /// Connect to the broker at `uri`.
    pub async fn connect(uri: &str) -> Result<Self, Error> {
        let client = redis::Client::open(uri).map_err(Error::Transient)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(Error::Transient)?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

fn classify(err: RedisError) -> Error {
    if err.code() == Some("NOGROUP") {
        Error::MissingStreamOrGroup(err.to_string())
    } else {
        Error::Transient(err)
    }
}

fn fields_of(map: HashMap<String, Value>) -> Result<Vec<(String, String)>, Error> {
    map.into_iter()
        .map(|(k, v)| {
            let v = from_redis_value::<String>(&v).map_err(Error::Transient)?;
            Ok((k, v))
        })
        .collect()
}

#[async_trait]
impl Broker for RedisBroker {
    async fn create_group(&self, stream: &str, group: &str) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let res: Result<(), RedisError> = conn.xgroup_create_mkstream(stream, group, "$").await;
        match res {
            Ok(()) => Ok(()),
            // Group already present: converged.
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(classify(e)),
        }
    }

    async fn destroy_group(&self, stream: &str, group: &str) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let res: Result<i64, RedisError> = conn.xgroup_destroy(stream, group).await;
        match res {
            Ok(_) => Ok(()),
            Err(e)
                if e.code() == Some("NOGROUP")
                    || e.to_string().contains("requires the key to exist") =>
            {
                Ok(())
            }
            Err(e) => Err(classify(e)),
        }
    }

    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<String, Error> {
        let mut conn = self.conn.clone();
        conn.xadd(stream, "*", fields).await.map_err(classify)
    }

    async fn read_group(
        &self,
        streams: &[&str],
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, Error> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);
        // Undelivered entries only; pending redelivery is the healer's job.
        let ids = vec![">"; streams.len()];
        let reply: Option<StreamReadReply> = conn
            .xread_options(streams, &ids, &opts)
            .await
            .map_err(classify)?;

        let mut out = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in key.ids {
                out.push(Delivery {
                    stream: key.key.clone(),
                    id: entry.id,
                    fields: fields_of(entry.map)?,
                });
            }
        }
        Ok(out)
    }

    async fn pending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary, Error> {
        let mut conn = self.conn.clone();
        let reply: StreamPendingReply = conn.xpending(stream, group).await.map_err(classify)?;
        Ok(match reply {
            StreamPendingReply::Empty => PendingSummary::default(),
            StreamPendingReply::Data(data) => PendingSummary {
                count: data.count as u64,
                min_id: Some(data.start_id),
                max_id: Some(data.end_id),
                consumers: data
                    .consumers
                    .into_iter()
                    .map(|c| (c.name, c.pending as u64))
                    .collect(),
            },
        })
    }

    async fn pending_range(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>, Error> {
        let mut conn = self.conn.clone();
        let reply: StreamPendingCountReply = conn
            .xpending_consumer_count(stream, group, "-", "+", count, consumer)
            .await
            .map_err(classify)?;
        Ok(reply
            .ids
            .into_iter()
            .map(|p| PendingEntry {
                id: p.id,
                consumer: p.consumer,
                idle: Duration::from_millis(p.last_delivered_ms as u64),
                deliveries: p.times_delivered as u64,
            })
            .collect())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        new_consumer: &str,
        min_idle: Duration,
        id: &str,
    ) -> Result<Vec<(String, Vec<(String, String)>)>, Error> {
        let mut conn = self.conn.clone();
        let reply: StreamClaimReply = conn
            .xclaim(
                stream,
                group,
                new_consumer,
                min_idle.as_millis() as usize,
                &[id],
            )
            .await
            .map_err(classify)?;
        reply
            .ids
            .into_iter()
            .map(|entry| Ok((entry.id, fields_of(entry.map)?)))
            .collect()
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(stream, group, &[id]).await.map_err(classify)?;
        Ok(())
    }

    async fn delete_entry(&self, stream: &str, id: &str) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xdel(stream, &[id]).await.map_err(classify)?;
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await.map_err(classify)?;
        Ok(())
    }

    async fn keys_matching(&self, glob: &str) -> Result<Vec<String>, Error> {
        let mut conn = self.conn.clone();
        conn.keys(glob).await.map_err(classify)
    }

    async fn length(&self, stream: &str) -> Result<u64, Error> {
        let mut conn = self.conn.clone();
        conn.xlen(stream).await.map_err(classify)
    }
}
