use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_io_timeout::TimeoutStream;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};
use tracing::Instrument;

use crate::backend::GpioBackend;
use crate::constants::defaults;
use crate::mapper::{RequestMapper, SharedRegistry};

mod service;
mod session;

use service::GpioService;
use session::{SessionTracker, SessionTrackerWrapper};

/// Settings of the Modbus/TCP server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// socket address to listen on
    pub listen: SocketAddr,
    /// the only unit id answered
    pub unit_id: u8,
    /// maximum number of concurrent sessions, extra connections are refused
    pub max_sessions: usize,
    /// a connection that sends nothing for this long is closed, `None` keeps it open
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], defaults::PORT)),
            unit_id: defaults::UNIT_ID,
            max_sessions: defaults::MAX_SESSIONS,
            idle_timeout: Some(Duration::from_secs(defaults::IDLE_TIMEOUT_SECS)),
        }
    }
}

/// A handle to the server async task. The server stops accepting
/// connections when the handle is dropped.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns a TCP server task onto the runtime. This method can only
/// be called from within the runtime context.
///
/// Each incoming connection is served on its own task. Every request is
/// handed to a [`RequestMapper`] built from `registry` and `config.unit_id`.
///
/// * `config` - listen address, unit id, session limit and idle timeout
/// * `registry` - registry configured and opened beforehand
pub async fn spawn_tcp_server_task<B: GpioBackend>(
    config: ServerConfig,
    registry: SharedRegistry<B>,
) -> Result<ServerHandle, std::io::Error> {
    let listener = TcpListener::bind(config.listen).await?;
    let local_addr = listener.local_addr()?;
    let mapper = RequestMapper::new(registry, config.unit_id);
    let tracker = SessionTracker::wrapped(config.max_sessions);

    let task = tokio::spawn(
        run_server(listener, mapper, tracker, config.idle_timeout)
            .instrument(tracing::info_span!("Modbus-Server-TCP", "listen" = ?local_addr)),
    );

    Ok(ServerHandle { local_addr, task })
}

async fn run_server<B: GpioBackend>(
    listener: TcpListener,
    mapper: RequestMapper<B>,
    tracker: SessionTrackerWrapper,
    idle_timeout: Option<Duration>,
) {
    tracing::info!("accepting connections, unit id: {}", mapper.unit_id());

    let server = Server::new(listener);
    let on_connected = move |stream: TcpStream, socket_addr: SocketAddr| {
        let mapper = mapper.clone();
        let tracker = tracker.clone();
        async move {
            accept_tcp_connection(stream, socket_addr, move |client_addr| {
                Ok(SessionTracker::add(&tracker, client_addr)
                    .map(|session| GpioService::new(mapper.clone(), client_addr, session)))
            })
            .map(|accepted| {
                accepted.map(|(service, stream)| (service, with_idle_timeout(stream, idle_timeout)))
            })
        }
    };
    let on_process_error = |err: std::io::Error| {
        if err.kind() == std::io::ErrorKind::TimedOut {
            tracing::info!("closing idle session");
        } else {
            tracing::warn!("session error: {}", err);
        }
    };

    match server.serve(&on_connected, on_process_error).await {
        Ok(_) => tracing::info!("server shutdown"),
        Err(err) => tracing::error!("error accepting connection: {}", err),
    }
}

type IdleStream = Pin<Box<TimeoutStream<TcpStream>>>;

/// Reads fail with `TimedOut` once the client has been silent for `timeout`
fn with_idle_timeout(stream: TcpStream, timeout: Option<Duration>) -> IdleStream {
    let mut stream = TimeoutStream::new(stream);
    stream.set_read_timeout(timeout);
    Box::pin(stream)
}
