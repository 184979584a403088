//! Client for a Redis-compatible store speaking RESP2.

mod cmd;
mod connection;

use async_trait::async_trait;
use bleed_cache::{CacheRecord, Store, StoreError};
use connection::RespConnection;
use redis_protocol::resp2::types::BytesFrame;
use tokio::sync::Mutex;

/// Verdict store kept in a RESP2 server, one hash per cache key under
/// `<name>:<cache key>`.
///
/// A single connection is shared. It is taken out for the duration of a
/// request and only put back after a complete reply, so a request abandoned
/// mid-flight (timeout) never leaves a stray reply on the wire.
pub struct RespStore {
    addr: String,
    name: String,
    conn: Mutex<Option<RespConnection>>,
}

impl RespStore {
    pub fn new(addr: &str, name: &str) -> Self {
        Self {
            addr: addr.to_string(),
            name: name.to_string(),
            conn: Mutex::new(None),
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.name, key)
    }

    async fn call(&self, frame: BytesFrame) -> Result<BytesFrame, StoreError> {
        let mut slot = self.conn.lock().await;

        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => RespConnection::connect(&self.addr)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?,
        };

        match conn.request(&frame).await {
            Ok(reply) => {
                *slot = Some(conn);
                cmd::check_reply(reply)
            }
            Err(e) => {
                tracing::debug!(addr = %self.addr, error = %e, "RESP request failed, dropping connection");
                Err(StoreError::Backend(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl Store for RespStore {
    async fn get(&self, key: &str) -> Result<Option<CacheRecord>, StoreError> {
        let reply = self.call(cmd::hgetall(&self.namespaced(key))).await?;
        cmd::decode_record(reply)
    }

    async fn put(&self, key: &str, record: CacheRecord) -> Result<(), StoreError> {
        self.call(cmd::hset_record(&self.namespaced(key), &record))
            .await
            .map(|_| ())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.call(cmd::ping()).await.map(|_| ())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bleed_cache::OutcomeCode;
    use bytes::{Bytes, BytesMut};
    use redis_protocol::resp2::decode::decode_bytes;
    use redis_protocol::resp2::encode::extend_encode;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    type Hashes = Arc<parking_lot::Mutex<HashMap<Bytes, Vec<(Bytes, Bytes)>>>>;

    fn dispatch(frame: &BytesFrame, hashes: &Hashes) -> BytesFrame {
        let BytesFrame::Array(args) = frame else {
            return BytesFrame::Error("ERR expected array".into());
        };
        let bulk = |f: &BytesFrame| match f {
            BytesFrame::BulkString(b) => b.clone(),
            _ => Bytes::new(),
        };
        let name = String::from_utf8_lossy(&bulk(&args[0])).to_uppercase();

        match name.as_str() {
            "PING" => BytesFrame::SimpleString("PONG".into()),
            "HSET" => {
                let key = bulk(&args[1]);
                let fields: Vec<(Bytes, Bytes)> = args[2..]
                    .chunks(2)
                    .map(|p| (bulk(&p[0]), bulk(&p[1])))
                    .collect();
                let n = fields.len() as i64;
                hashes.lock().insert(key, fields);
                BytesFrame::Integer(n)
            }
            "HGETALL" => {
                let key = bulk(&args[1]);
                let items = hashes
                    .lock()
                    .get(&key)
                    .map(|fields| {
                        fields
                            .iter()
                            .flat_map(|(k, v)| {
                                [
                                    BytesFrame::BulkString(k.clone()),
                                    BytesFrame::BulkString(v.clone()),
                                ]
                            })
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                BytesFrame::Array(items)
            }
            other => BytesFrame::Error(format!("ERR unknown command '{other}'").as_str().into()),
        }
    }

    async fn serve_client(mut stream: TcpStream, hashes: Hashes) {
        let mut buf = BytesMut::with_capacity(4096);
        loop {
            match stream.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            while let Ok(Some((frame, consumed))) = decode_bytes(&buf.clone().freeze()) {
                let _ = buf.split_to(consumed);
                let mut out = BytesMut::new();
                extend_encode(&mut out, &dispatch(&frame, &hashes), false).unwrap();
                if stream.write_all(&out).await.is_err() {
                    return;
                }
            }
        }
    }

    /// Minimal in-memory RESP2 server understanding PING, HSET and HGETALL.
    async fn spawn_fake_server() -> (String, Hashes) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let hashes: Hashes = Arc::default();
        let shared = Arc::clone(&hashes);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_client(stream, Arc::clone(&shared)));
            }
        });
        (addr, hashes)
    }

    #[tokio::test]
    async fn put_then_get_round_trips_through_server() {
        let (addr, hashes) = spawn_fake_server().await;
        let store = RespStore::new(&addr, "heartbleed");

        let record = CacheRecord {
            host: "a.com".into(),
            last_update: 1_700_000_000,
            status: OutcomeCode::Error,
            data: String::new(),
            error: "timeout".into(),
        };
        store.put("https://a.com/skip", record.clone()).await.unwrap();

        assert!(hashes
            .lock()
            .contains_key(&Bytes::from_static(b"heartbleed:https://a.com/skip")));
        assert_eq!(store.get("https://a.com/skip").await.unwrap(), Some(record));
        assert_eq!(store.get("https://a.com").await.unwrap(), None);
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn ping_writes_resp_array_on_the_wire() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let expected = b"*1\r\n$4\r\nPING\r\n";
            let mut got = vec![0u8; expected.len()];
            stream.read_exact(&mut got).await.unwrap();
            stream.write_all(b"+PONG\r\n").await.unwrap();
            got == expected
        });

        let store = RespStore::new(&addr, "hb");
        store.ping().await.unwrap();
        assert!(server.await.unwrap());
    }

    #[tokio::test]
    async fn abandoned_request_releases_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        // Accept and hold connections without ever replying.
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let store = RespStore::new(&addr, "hb");
        let res = tokio::time::timeout(Duration::from_millis(50), store.ping()).await;
        assert!(res.is_err());

        // The lock is free and the half-used connection was discarded.
        let slot = store.conn.try_lock().unwrap();
        assert!(slot.is_none());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_backend_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let store = RespStore::new(&addr, "heartbleed");
        assert!(matches!(
            store.get("https://a.com").await,
            Err(StoreError::Backend(_))
        ));
        assert!(matches!(store.ping().await, Err(StoreError::Backend(_))));
    }

    #[tokio::test]
    async fn redials_after_dropped_connection() {
        let (addr, _) = spawn_fake_server().await;
        let store = RespStore::new(&addr, "hb");
        store.ping().await.unwrap();

        // Forget the pooled connection as if a request had failed.
        *store.conn.lock().await = None;
        store.ping().await.unwrap();
        assert!(store.conn.lock().await.is_some());
    }
}
