//! One-shot lifecycle of a proxied miner connection.
//!
//! The supervisor dials the upstream pool, then relays bytes in both
//! directions until the first of three things finishes: the client pump,
//! the upstream pump or the interception pipeline. Whichever ends first
//! decides the [`CloseReason`]. Failures drop everything at once; an end of
//! stream closes both sockets and lets the pipeline finish the chunks it
//! was already handed.
//!
//! Pumps hand every chunk to a single interception queue before writing it
//! to the opposite socket. The queue is shared by both directions, so the
//! pipeline sees a submission before the response it caused.

use crate::codec::FrameDecoder;
use crate::config::RelayConfig;
use crate::interceptor::{Interceptor, SessionEvent};
use crate::metrics::ProxyMetrics;
use crate::payout::PayoutTrigger;
use crate::protocol::{Direction, StratumMessage};
use crate::session::Session;
use crate::{Error, Result};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Services shared by every connection
pub struct ProxyContext {
    pub interceptor: Interceptor,
    pub trigger: Arc<PayoutTrigger>,
    /// `host:port` dialled for each accepted miner
    pub upstream: String,
    pub read_buffer_size: usize,
    pub metrics: Arc<ProxyMetrics>,
}

impl ProxyContext {
    pub fn new(config: &RelayConfig, trigger: Arc<PayoutTrigger>, metrics: Arc<ProxyMetrics>) -> Self {
        Self {
            interceptor: Interceptor::new(config.pool_account.clone()),
            trigger,
            upstream: config.upstream_endpoint(),
            read_buffer_size: config.read_buffer_size.max(1),
            metrics,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Connecting,
    Relaying,
    Closed,
}

/// Why a connection ended
#[derive(Debug)]
pub enum CloseReason {
    /// The miner closed its socket
    ClientDisconnected,
    /// The pool closed its socket
    UpstreamDisconnected,
    /// The pool could not be dialled
    UpstreamUnreachable(Error),
    /// A transport, protocol, or payout failure
    Failed(Error),
}

impl CloseReason {
    /// Metrics label
    pub fn label(&self) -> &'static str {
        match self {
            CloseReason::ClientDisconnected => "client_eof",
            CloseReason::UpstreamDisconnected => "upstream_eof",
            CloseReason::UpstreamUnreachable(_) => "upstream_unreachable",
            CloseReason::Failed(e) => e.category(),
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            CloseReason::UpstreamUnreachable(e) | CloseReason::Failed(e) => Some(e),
            _ => None,
        }
    }

    fn end_of_stream(direction: Direction) -> Self {
        match direction {
            Direction::ClientToUpstream => CloseReason::ClientDisconnected,
            Direction::UpstreamToClient => CloseReason::UpstreamDisconnected,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientDisconnected => write!(f, "client disconnected"),
            CloseReason::UpstreamDisconnected => write!(f, "upstream disconnected"),
            CloseReason::UpstreamUnreachable(e) => write!(f, "upstream unreachable: {}", e),
            CloseReason::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// Drives a single accepted miner connection
pub struct ConnectionSupervisor {
    connection_id: Uuid,
    peer_addr: SocketAddr,
    context: Arc<ProxyContext>,
    state: SupervisorState,
}

impl ConnectionSupervisor {
    pub fn new(peer_addr: SocketAddr, context: Arc<ProxyContext>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            peer_addr,
            context,
            state: SupervisorState::Connecting,
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Run the connection to completion
    pub async fn run(mut self, client: TcpStream) -> CloseReason {
        let span = tracing::info_span!("connection", id = %self.connection_id, peer = %self.peer_addr);
        async move {
            let reason = self.supervise(client).await;
            self.context.metrics.record_teardown(reason.label());
            match reason.error() {
                Some(e) => warn!(reason = reason.label(), "Connection closed: {}", e),
                None => info!(reason = reason.label(), "Connection closed"),
            }
            reason
        }
        .instrument(span)
        .await
    }

    async fn supervise(&mut self, client: TcpStream) -> CloseReason {
        self.state = SupervisorState::Connecting;
        let upstream = match TcpStream::connect(&self.context.upstream).await {
            Ok(stream) => stream,
            Err(e) => {
                self.state = SupervisorState::Closed;
                self.context.metrics.upstream_failures.inc();
                return CloseReason::UpstreamUnreachable(Error::Transport(format!(
                    "Failed to connect to {}: {}",
                    self.context.upstream, e
                )));
            }
        };
        // Frames are small and latency matters more than throughput
        let _ = client.set_nodelay(true);
        let _ = upstream.set_nodelay(true);

        self.state = SupervisorState::Relaying;
        info!(upstream = %self.context.upstream, "Relaying");
        self.context.metrics.active_connections.inc();

        let reason = relay(client, upstream, &self.context).await;

        self.context.metrics.active_connections.dec();
        self.state = SupervisorState::Closed;
        reason
    }
}

/// Chunks allowed in flight between the pumps and the interception task
/// before reading is paused
const QUEUE_DEPTH: usize = 64;

type ChunkQueue = mpsc::Sender<(Direction, Vec<u8>)>;

/// Relay between an accepted client and a connected upstream until either
/// side ends or interception fails. Both streams are closed on return.
///
/// End of stream on either side stops both pumps, but chunks already
/// relayed are still inspected before the reason is returned. Any other
/// failure returns immediately.
pub async fn relay<C, U>(client: C, upstream: U, context: &ProxyContext) -> CloseReason
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (upstream_read, upstream_write) = tokio::io::split(upstream);
    let (queue_tx, queue_rx) = mpsc::channel(QUEUE_DEPTH);

    let mut client_pump = Box::pin(pump(
        Direction::ClientToUpstream,
        client_read,
        upstream_write,
        queue_tx.clone(),
        context.read_buffer_size,
    ));
    let mut upstream_pump = Box::pin(pump(
        Direction::UpstreamToClient,
        upstream_read,
        client_write,
        queue_tx,
        context.read_buffer_size,
    ));
    let mut interception = Box::pin(intercept(queue_rx, context));

    let reason = tokio::select! {
        reason = &mut client_pump => reason,
        reason = &mut upstream_pump => reason,
        result = &mut interception => {
            return match result {
                Err(e) => CloseReason::Failed(e),
                Ok(()) => CloseReason::Failed(Error::Internal("Both pumps stopped".to_string())),
            };
        }
    };

    if !matches!(reason, CloseReason::ClientDisconnected | CloseReason::UpstreamDisconnected) {
        return reason;
    }

    // Closes both sockets and every queue sender, so the drain below ends
    drop(client_pump);
    drop(upstream_pump);

    match interception.await {
        Ok(()) => reason,
        Err(e) => CloseReason::Failed(e),
    }
}

/// Copy one direction, queueing each chunk for interception before it is
/// written to the peer
async fn pump<R, W>(
    direction: Direction,
    mut reader: R,
    mut writer: W,
    queue: ChunkQueue,
    buffer_size: usize,
) -> CloseReason
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; buffer_size];
    loop {
        let n = match reader.read(&mut buffer).await {
            Ok(0) => {
                let _ = writer.shutdown().await;
                return CloseReason::end_of_stream(direction);
            }
            Ok(n) => n,
            Err(e) => {
                return CloseReason::Failed(Error::Transport(format!(
                    "Read failed on {}: {}",
                    direction.label(),
                    e
                )))
            }
        };

        if queue.send((direction, buffer[..n].to_vec())).await.is_err() {
            return CloseReason::Failed(Error::Internal("Interception queue closed".to_string()));
        }

        if let Err(e) = writer.write_all(&buffer[..n]).await {
            return CloseReason::Failed(Error::Transport(format!(
                "Write failed on {}: {}",
                direction.label(),
                e
            )));
        }
    }
}

/// Inspect queued chunks in order until every sender is gone
async fn intercept(mut queue: mpsc::Receiver<(Direction, Vec<u8>)>, context: &ProxyContext) -> Result<()> {
    let mut pipeline = Pipeline::new();
    while let Some((direction, chunk)) = queue.recv().await {
        pipeline.process(direction, &chunk, context).await?;
    }
    Ok(())
}

/// Session plus one decoder per direction; processes chunks strictly in
/// the order they are handed in
#[derive(Debug, Default)]
pub struct Pipeline {
    session: Session,
    client_decoder: FrameDecoder,
    upstream_decoder: FrameDecoder,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn process(&mut self, direction: Direction, chunk: &[u8], context: &ProxyContext) -> Result<()> {
        let decoder = match direction {
            Direction::ClientToUpstream => &mut self.client_decoder,
            Direction::UpstreamToClient => &mut self.upstream_decoder,
        };

        for frame in decoder.feed(chunk)? {
            debug!("{} {}", direction.arrow(), frame);
            context.metrics.record_frame(direction);

            let message = StratumMessage::parse(&frame)?;
            match context.interceptor.inspect(direction, &mut self.session, &message)? {
                Some(SessionEvent::SubmissionOutstanding(_)) => {
                    context.metrics.submissions_observed.inc();
                }
                Some(SessionEvent::SubmissionResolved(id)) => {
                    context.metrics.submissions_resolved.inc();
                    let record = context.trigger.fire(&self.session).await?;
                    context.metrics.record_payout(record.amount);
                    info!(id = %id, address = %record.address, amount = record.amount, "Payout recorded");
                }
                _ => {}
            }
        }
        Ok(())
    }
}
