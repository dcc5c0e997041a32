//! Tokio runtime for [`Endpoint`].
//!
//! One task owns the endpoint and its socket. It waits on the socket, on
//! commands from [`EndpointHandle`]s and on the endpoint's next timer, and
//! after every step flushes outgoing datagrams and events.

use std::net::SocketAddr;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant as TokioInstant, sleep_until};
use tracing::{Instrument, debug, info, info_span, trace, warn};

use super::config::EndpointConfig;
use super::endpoint::{Endpoint, Event};
use super::socket::{CoapSocket, CoapSocketBuilder, DEFAULT_RECV_BUFFER_SIZE};
use crate::core::{CoapError, CoapResult, ResourceHandler, ResourceSnapshot};
use crate::message::{Message, Token};

/// Request to the event loop.
#[derive(Debug)]
enum Command {
    Notify {
        path: String,
        snapshot: ResourceSnapshot,
        reply: oneshot::Sender<usize>,
    },
    RemoveResource {
        path: String,
        reply: oneshot::Sender<usize>,
    },
    Request {
        remote: SocketAddr,
        message: Message,
        reply: oneshot::Sender<CoapResult<Token>>,
    },
    Observe {
        remote: SocketAddr,
        path: String,
        reply: oneshot::Sender<CoapResult<Token>>,
    },
    CancelObservation {
        token: Token,
        reply: oneshot::Sender<CoapResult<bool>>,
    },
    Stats {
        reply: oneshot::Sender<EndpointStats>,
    },
    Shutdown,
}

/// Snapshot of endpoint state sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EndpointStats {
    /// Peers observing local resources.
    pub observations: usize,
    /// Remote resources observed.
    pub subscriptions: usize,
    /// Confirmable exchanges awaiting a reply.
    pub live_exchanges: usize,
}

/// A running endpoint.
///
/// # Example
///
/// ```ignore
/// let config = EndpointConfig::builder()
///     .bind_addr("0.0.0.0:5683".parse()?)
///     .build()?;
/// let (handle, mut events) = CoapEndpoint::bind(config, Sensors::default()).await?;
///
/// let snapshot = ResourceSnapshot::new(b"21.5".to_vec(), 1, Duration::from_secs(60));
/// handle.notify("temperature", snapshot).await?;
///
/// while let Some(event) = events.recv().await {
///     if let Event::ObservationCancelled { remote, reason, .. } = event {
///         println!("{remote} stopped observing: {reason:?}");
///     }
/// }
/// ```
#[derive(Debug)]
pub struct CoapEndpoint;

impl CoapEndpoint {
    /// Bind the configured address and start the event loop.
    ///
    /// Returns a handle for issuing operations and the event stream. The
    /// loop stops on [`EndpointHandle::shutdown`] or when every handle is
    /// dropped.
    pub async fn bind<H: ResourceHandler>(
        config: EndpointConfig,
        handler: H,
    ) -> CoapResult<(EndpointHandle, mpsc::Receiver<Event>)> {
        let endpoint = Endpoint::new(config, handler)?;
        let config = endpoint.config();

        let socket = CoapSocketBuilder::new()
            .recv_buffer_size(config.recv_buffer_size.unwrap_or(DEFAULT_RECV_BUFFER_SIZE))
            .max_message_size(config.max_message_size)
            .bind(config.bind_addr)
            .await?;
        let local_addr = socket.local_addr()?;

        let (command_tx, command_rx) = mpsc::channel(config.event_capacity);
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);

        let span = info_span!("coap_endpoint", local = %local_addr);
        tokio::spawn(run(endpoint, socket, command_rx, event_tx).instrument(span));
        info!(%local_addr, "endpoint listening");

        Ok((
            EndpointHandle {
                tx: command_tx,
                local_addr,
            },
            event_rx,
        ))
    }
}

/// Cloneable handle to a running endpoint.
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    tx: mpsc::Sender<Command>,
    local_addr: SocketAddr,
}

impl EndpointHandle {
    /// Address the endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Notify the observers of `path`; returns the number notified.
    pub async fn notify(
        &self,
        path: impl Into<String>,
        snapshot: ResourceSnapshot,
    ) -> CoapResult<usize> {
        let path = path.into();
        self.call(|reply| Command::Notify {
            path,
            snapshot,
            reply,
        })
        .await
    }

    /// Drop every observation of `path`; returns the number removed.
    pub async fn remove_resource(&self, path: impl Into<String>) -> CoapResult<usize> {
        let path = path.into();
        self.call(|reply| Command::RemoveResource { path, reply }).await
    }

    /// Send a request. The response arrives as [`Event::Response`].
    pub async fn request(&self, remote: SocketAddr, message: Message) -> CoapResult<Token> {
        self.call(|reply| Command::Request {
            remote,
            message,
            reply,
        })
        .await?
    }

    /// Observe `path` on `remote`.
    pub async fn observe(&self, remote: SocketAddr, path: impl Into<String>) -> CoapResult<Token> {
        let path = path.into();
        self.call(|reply| Command::Observe {
            remote,
            path,
            reply,
        })
        .await?
    }

    /// Cancel the subscription with `token`.
    pub async fn cancel_observation(&self, token: Token) -> CoapResult<bool> {
        self.call(|reply| Command::CancelObservation { token, reply }).await?
    }

    /// Current state sizes.
    pub async fn stats(&self) -> CoapResult<EndpointStats> {
        self.call(|reply| Command::Stats { reply }).await
    }

    /// Stop the event loop.
    ///
    /// Pending exchanges are abandoned without further retransmission.
    pub async fn shutdown(&self) -> CoapResult<()> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| CoapError::Shutdown)
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> CoapResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| CoapError::Shutdown)?;
        rx.await.map_err(|_| CoapError::Shutdown)
    }
}

/// Endpoint time, following tokio's clock so paused-time tests work.
fn now() -> std::time::Instant {
    TokioInstant::now().into_std()
}

async fn run<H: ResourceHandler>(
    mut endpoint: Endpoint<H>,
    mut socket: CoapSocket,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<Event>,
) {
    loop {
        flush(&mut endpoint, &socket, &events).await;

        let deadline = endpoint.poll_timeout();
        let timer = async {
            match deadline {
                Some(deadline) => sleep_until(TokioInstant::from_std(deadline)).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            received = socket.recv_from() => match received {
                Ok((datagram, remote)) => endpoint.handle(now(), remote, datagram),
                Err(e) => warn!("receive failed: {e}"),
            },
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => break,
                Some(command) => apply(&mut endpoint, command),
            },
            () = timer => endpoint.handle_timeout(now()),
        }
    }

    flush(&mut endpoint, &socket, &events).await;
    info!(
        live_exchanges = endpoint.engine().tracker().live_count(),
        "endpoint stopped"
    );
}

fn apply<H: ResourceHandler>(endpoint: &mut Endpoint<H>, command: Command) {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        Command::Notify {
            path,
            snapshot,
            reply,
        } => {
            let _ = reply.send(endpoint.notify_resource_changed(now(), &path, &snapshot));
        }
        Command::RemoveResource { path, reply } => {
            let _ = reply.send(endpoint.remove_resource(now(), &path));
        }
        Command::Request {
            remote,
            message,
            reply,
        } => {
            let _ = reply.send(endpoint.request(now(), remote, message));
        }
        Command::Observe {
            remote,
            path,
            reply,
        } => {
            let _ = reply.send(endpoint.observe(now(), remote, &path));
        }
        Command::CancelObservation { token, reply } => {
            let _ = reply.send(endpoint.cancel_observation(now(), token));
        }
        Command::Stats { reply } => {
            let _ = reply.send(EndpointStats {
                observations: endpoint.observations().len(),
                subscriptions: endpoint.subscriptions().len(),
                live_exchanges: endpoint.engine().tracker().live_count(),
            });
        }
        Command::Shutdown => {}
    }
}

async fn flush<H: ResourceHandler>(
    endpoint: &mut Endpoint<H>,
    socket: &CoapSocket,
    events: &mpsc::Sender<Event>,
) {
    while let Some(transmit) = endpoint.poll_transmit() {
        trace!(destination = %transmit.destination, len = transmit.contents.len(), "send");
        if let Err(e) = socket.send_to(&transmit.contents, transmit.destination).await {
            warn!(destination = %transmit.destination, "send failed: {e}");
        }
    }

    // Never block the loop on a slow consumer.
    while let Some(event) = endpoint.poll_event() {
        match events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(?event, "event channel full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event receiver dropped");
            }
        }
    }
}
