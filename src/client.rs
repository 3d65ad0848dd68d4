//! Background connection task and its event stream.
//!
//! All blocking socket work runs on a tokio runtime. The presentation side
//! only queues commands and reads `FrameEvent`s from a plain
//! `std::sync::mpsc` channel, so it never blocks on the network.

use std::sync::mpsc::Sender;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::cache::{ImageCache, ImageListing};
use crate::discovery::{self, DiscoveryConfig};
use crate::error::{BspError, FaultKind};
use crate::logger::{Logger, NoopLogger};
use crate::protocol::timeouts::CONNECT_MS;
use crate::session::Session;
use crate::transport::Transport;
use crate::url::FrameAddr;

/// Everything the presentation layer needs to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Connected,
    Closed,
    /// Connect or discovery deadline passed. Retry is the caller's call.
    TimedOut,
    ConnectFailed(String),
    /// A response was read off the wire (generic ack).
    Received,
    TransferComplete(String),
    ListingComplete(Vec<String>),
    ProtocolFault { kind: FaultKind, message: String },
    Discovered(String),
}

enum Command {
    SendImage(Vec<u8>),
    RequestAll,
    Delete(String),
    Close,
}

#[derive(Clone)]
pub struct ClientOptions {
    pub connect_timeout_ms: u64,
    pub cache: ImageCache,
    pub logger: Arc<dyn Logger>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: CONNECT_MS,
            cache: ImageCache::new(),
            logger: Arc::new(NoopLogger),
        }
    }
}

/// Handle to one appliance connection. Requests are queued and run one at a
/// time on the connection task; dropping the handle closes the connection.
pub struct FrameClient {
    commands: UnboundedSender<Command>,
    cache: ImageCache,
    listing: ImageListing,
    task: JoinHandle<()>,
}

impl FrameClient {
    /// Connect to `addr` on `rt` and start processing commands. Progress is
    /// reported on `events`, starting with `Connected`, `TimedOut` or
    /// `ConnectFailed`.
    pub fn spawn(
        rt: &Handle,
        addr: FrameAddr,
        opts: ClientOptions,
        events: Sender<FrameEvent>,
    ) -> Self {
        let (tx, rx) = unbounded_channel();
        let cache = opts.cache.clone();
        let listing = ImageListing::new();
        let task = rt.spawn(run_connection(addr, opts, listing.clone(), rx, events));
        Self {
            commands: tx,
            cache,
            listing,
            task,
        }
    }

    /// Queue an image transfer. Returns false if the connection is gone.
    pub fn send_image(&self, image: Vec<u8>) -> bool {
        self.commands.send(Command::SendImage(image)).is_ok()
    }

    pub fn request_all(&self) -> bool {
        self.commands.send(Command::RequestAll).is_ok()
    }

    /// Drop `id` from the local listing and cache right away, then queue the
    /// delete request. No acknowledgement follows.
    pub fn delete(&self, id: &str) -> bool {
        self.listing.remove(id);
        self.cache.remove(id);
        self.commands.send(Command::Delete(id.to_string())).is_ok()
    }

    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    pub fn listing(&self) -> &ImageListing {
        &self.listing
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn run_connection(
    addr: FrameAddr,
    opts: ClientOptions,
    listing: ImageListing,
    mut commands: UnboundedReceiver<Command>,
    events: Sender<FrameEvent>,
) {
    let emit = |ev: FrameEvent| {
        let _ = events.send(ev);
    };
    let logger = Arc::clone(&opts.logger);

    let transport = match Transport::connect(&addr.host, addr.port, opts.connect_timeout_ms).await {
        Ok(t) => t,
        Err(e @ BspError::Timeout(_)) => {
            logger.fault("connect", &e);
            emit(FrameEvent::TimedOut);
            return;
        }
        Err(e) => {
            logger.fault("connect", &e);
            emit(FrameEvent::ConnectFailed(e.to_string()));
            return;
        }
    };
    logger.connected(transport.peer());
    emit(FrameEvent::Connected);

    let mut session = Session::new(transport, opts.cache, listing).with_logger(logger);
    loop {
        let command = tokio::select! {
            biased;
            cmd = commands.recv() => cmd,
            probed = session.probe() => match probed {
                // Unsolicited byte while idle; already logged, nothing to do
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => {
                    emit(FrameEvent::Closed);
                    return;
                }
            },
        };

        // A closed command queue means the handle was dropped
        let Some(command) = command else {
            session.close().await;
            emit(FrameEvent::Closed);
            return;
        };

        let before = session.responses_read();
        let outcome = match command {
            Command::SendImage(image) => session
                .send_transfer(&image)
                .await
                .map(|id| Some(FrameEvent::TransferComplete(id))),
            Command::RequestAll => session
                .request_all()
                .await
                .map(|ids| Some(FrameEvent::ListingComplete(ids.collect()))),
            Command::Delete(id) => session.delete(&id).await.map(|_| None),
            Command::Close => {
                session.close().await;
                emit(FrameEvent::Closed);
                return;
            }
        };

        match outcome {
            Ok(Some(ev)) => emit(ev),
            Ok(None) => {}
            Err(e) if e.is_fatal() => {
                emit(FrameEvent::Closed);
                return;
            }
            Err(e) => emit(FrameEvent::ProtocolFault {
                kind: e.kind(),
                message: e.to_string(),
            }),
        }
        if session.responses_read() > before {
            emit(FrameEvent::Received);
        }
    }
}

/// Run discovery on `rt`, reporting `Discovered(address)` or `TimedOut`.
pub fn spawn_discovery(
    rt: &Handle,
    cfg: DiscoveryConfig,
    logger: Arc<dyn Logger>,
    events: Sender<FrameEvent>,
) -> JoinHandle<()> {
    rt.spawn(async move {
        match discovery::discover(&cfg).await {
            Ok(address) => {
                logger.discovered(&address);
                let _ = events.send(FrameEvent::Discovered(address));
            }
            Err(e) => {
                logger.fault("discover", &e);
                let _ = events.send(FrameEvent::TimedOut);
            }
        }
    })
}
