use bytes::BytesMut;
use redis_protocol::resp2::decode::decode_bytes;
use redis_protocol::resp2::encode::extend_encode;
use redis_protocol::resp2::types::BytesFrame;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed by server")]
    Closed,
}

/// One client connection to a RESP2 server. Requests are strictly
/// one-at-a-time: write a command, read exactly one reply frame.
pub struct RespConnection {
    stream: TcpStream,
    buf: BytesMut,
}

impl RespConnection {
    pub async fn connect(addr: &str) -> Result<Self, RespError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        tracing::debug!(addr, "RESP connection established");
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(4096),
        })
    }

    pub async fn request(&mut self, frame: &BytesFrame) -> Result<BytesFrame, RespError> {
        let mut out = BytesMut::new();
        extend_encode(&mut out, frame, false).map_err(|e| RespError::Protocol(e.to_string()))?;
        self.stream.write_all(&out).await?;

        loop {
            if !self.buf.is_empty() {
                match decode_bytes(&self.buf.clone().freeze()) {
                    Ok(Some((reply, consumed))) => {
                        let _ = self.buf.split_to(consumed);
                        return Ok(reply);
                    }
                    Ok(None) => {} // partial reply
                    Err(e) => return Err(RespError::Protocol(e.to_string())),
                }
            }

            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(RespError::Closed);
            }
        }
    }
}
