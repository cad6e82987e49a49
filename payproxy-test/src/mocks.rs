use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// How long a test waits for a line or a close before failing
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Upstream pool stand-in; each proxied miner shows up as one accepted
/// connection
pub struct MockPool {
    listener: TcpListener,
}

impl MockPool {
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the proxy to dial in on behalf of a miner
    pub async fn accept(&self) -> Result<LineConnection> {
        let (stream, _) = timeout(IO_TIMEOUT, self.listener.accept())
            .await
            .context("proxy never dialled the pool")??;
        Ok(LineConnection::from_stream(stream))
    }
}

/// Newline-delimited JSON over TCP, used for both the miner and the pool
/// end of a proxied connection
pub struct LineConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl LineConnection {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub async fn send(&mut self, message: &Value) -> Result<()> {
        self.send_raw(&format!("{}\n", message)).await
    }

    /// Write text exactly as given
    pub async fn send_raw(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        Ok(())
    }

    /// Next raw line including its terminator, or `None` at end of stream
    pub async fn recv_raw_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = timeout(IO_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .context("timed out waiting for a line")??;
        Ok(if n == 0 { None } else { Some(line) })
    }

    /// Next non-blank line parsed as JSON
    pub async fn recv(&mut self) -> Result<Value> {
        loop {
            let line = self
                .recv_raw_line()
                .await?
                .ok_or_else(|| anyhow!("connection closed while waiting for a message"))?;
            if line.trim().is_empty() {
                continue;
            }
            return Ok(serde_json::from_str(line.trim_end())?);
        }
    }

    /// Drain whatever is still in flight and require the peer to close
    pub async fn expect_closed(&mut self) -> Result<()> {
        loop {
            match self.recv_raw_line().await {
                Ok(None) => return Ok(()),
                Ok(Some(_)) => continue,
                Err(e) => {
                    // A reset counts as closed; a timeout does not
                    if e.downcast_ref::<std::io::Error>().is_some() {
                        return Ok(());
                    }
                    return Err(e);
                }
            }
        }
    }
}
