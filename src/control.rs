//! Websocket control channel.
//!
//! A single client connects, sends instrument description messages (JSON text frames)
//! and receives every published block as a JSON array. Only one client is served at a
//! time: the subscriber slot is reserved the moment a TCP connection is accepted, and
//! any further connection is closed straight away while the first one lives.
//!
//! A message that cannot be decoded is refused and logged; the connection stays open
//! waiting for a valid one. Devices that fail to build are logged one by one and the
//! remaining devices are applied.

use crate::description::InstrumentDescription;
use crate::error::{AppResult, DaqError};
use crate::pipeline::publisher::{SlotLease, Subscriber};
use crate::pipeline::PipelineContext;
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Subscriber writing to the sending half of a websocket.
pub struct WsSubscriber {
    peer: SocketAddr,
    sink: Mutex<WsSink>,
}

#[async_trait]
impl Subscriber for WsSubscriber {
    fn peer(&self) -> String {
        self.peer.to_string()
    }

    async fn ping(&self) -> AppResult<()> {
        self.sink
            .lock()
            .await
            .send(Message::Ping(Default::default()))
            .await?;
        Ok(())
    }

    async fn deliver(&self, block: &[f64]) -> AppResult<()> {
        let payload = serde_json::to_string(block)?;
        self.sink
            .lock()
            .await
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| DaqError::Delivery(e.to_string()))
    }
}

/// Accept loop of the control channel.
pub struct ControlServer {
    listener: TcpListener,
    ctx: Arc<PipelineContext>,
}

impl ControlServer {
    /// Bind the listening socket.
    pub async fn bind(addr: &str, ctx: Arc<PipelineContext>) -> AppResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(address = %listener.local_addr()?, "control channel listening");
        Ok(Self { listener, ctx })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve connections until the process ends.
    pub async fn run(self) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    continue;
                }
            };

            let lease = match self.ctx.subscribers.reserve() {
                Ok(lease) => lease,
                Err(e) => {
                    warn!(%peer, error = %e, "connection refused");
                    drop(stream);
                    continue;
                }
            };

            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(async move {
                if let Err(e) = handle_client(stream, peer, lease, ctx).await {
                    warn!(%peer, error = %e, "control connection ended with error");
                }
            });
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    lease: SlotLease,
    ctx: Arc<PipelineContext>,
) -> AppResult<()> {
    let websocket = tokio_tungstenite::accept_async(stream).await?;
    let (sink, mut incoming) = websocket.split();

    lease.attach(Arc::new(WsSubscriber {
        peer,
        sink: Mutex::new(sink),
    }));

    while let Some(message) = incoming.next().await {
        match message? {
            Message::Text(text) => {
                if let Err(e) = apply_description(text.as_str(), &ctx) {
                    warn!(%peer, error = %e, "configuration message refused");
                }
            }
            Message::Close(_) => break,
            other => debug!(%peer, kind = ?other, "ignored frame"),
        }
    }

    info!(%peer, "subscriber disconnected");
    Ok(())
}

/// Decode a description message and make it the active configuration.
///
/// Returns the number of devices applied. Individual device failures are logged and do
/// not fail the message.
pub fn apply_description(message: &str, ctx: &PipelineContext) -> AppResult<usize> {
    let report = InstrumentDescription::decode(message)?.into_configuration()?;
    for rejected in &report.rejected {
        warn!(error = %rejected, "device skipped");
    }

    let applied = report.configuration.devices.len();
    ctx.apply_configuration(report.configuration);
    Ok(applied)
}
