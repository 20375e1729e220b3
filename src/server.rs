use crate::protocol::resp::RespValue;
use crate::protocol::CommandExecutor;
use crate::{config::Config, error::Result, network::Connection};
use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream};
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CLIENT_TOKEN: usize = 2;

/// Reads served to one connection before the loop moves on
const MAX_READS_PER_EVENT: usize = 16;

/// Queued reply bytes above which a connection stops being read
const OUTPUT_HIGH_WATER: usize = 1024 * 1024;

type Clients = HashMap<Token, (MioTcpStream, Connection)>;

/// What the event loop should do with a client after serving it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    /// Wait for the next readiness event
    Idle,
    /// Input may remain in the socket; serve again without waiting
    Ready,
    Close,
}

/// Stops a running [`Server`] from another thread
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Signal the server to shut down gracefully
    pub fn shutdown(&self) {
        info!("Initiating server shutdown");
        self.flag.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            error!("Failed to wake event loop: {}", e);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Single-threaded Redis-compatible server
///
/// One `mio` event loop owns the listener, every client connection and the
/// keyspace. Commands run to completion in arrival order, so the keyspace
/// needs no locking.
pub struct Server {
    config: Config,
    poll: Poll,
    listener: MioTcpListener,
    local_addr: SocketAddr,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Validate the configuration and bind the listening socket
    pub fn bind(mut config: Config) -> Result<Self> {
        config.validate()?;

        let std_listener = TcpListener::bind(config.listen_addr())?;
        std_listener.set_nonblocking(true)?;
        let local_addr = std_listener.local_addr()?;
        let mut listener = MioTcpListener::from_std(std_listener);

        // Report the real port when an ephemeral one was requested
        config.port = local_addr.port();

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        Ok(Self {
            config,
            poll,
            listener,
            local_addr,
            shutdown: ShutdownHandle {
                flag: Arc::new(AtomicBool::new(false)),
                waker,
            },
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run the event loop
    ///
    /// This method blocks until [`ShutdownHandle::shutdown`] is called.
    pub fn run(self) -> Result<()> {
        let Server {
            config,
            mut poll,
            mut listener,
            local_addr,
            shutdown,
        } = self;

        let mut executor = CommandExecutor::new(&config);
        let mut events = Events::with_capacity(1024);
        let mut connections: Clients = HashMap::new();
        let mut ready: Vec<Token> = Vec::new();
        let mut read_buf = vec![0u8; config.read_buffer_size];
        let mut next_token = FIRST_CLIENT_TOKEN;
        let mut next_client_id = 1u64;

        info!("CQDAM server listening on {}", local_addr);

        while !shutdown.is_shutdown() {
            // Edge-triggered readiness is not repeated for unread input
            let timeout = if ready.is_empty() {
                None
            } else {
                Some(Duration::ZERO)
            };
            if let Err(e) = poll.poll(&mut events, timeout) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => loop {
                        match listener.accept() {
                            Ok((mut stream, addr)) => {
                                executor.stats_mut().total_connections_received += 1;

                                if connections.len() >= config.max_clients {
                                    warn!("Rejecting {}: max clients reached", addr);
                                    executor.stats_mut().rejected_connections += 1;
                                    let reply =
                                        RespValue::Error("ERR max number of clients reached".into());
                                    let _ = stream.write(&reply.to_bytes());
                                    continue;
                                }

                                // Configure socket
                                if let Err(e) = stream.set_nodelay(config.tcp_nodelay) {
                                    warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                                }

                                let token = Token(next_token);
                                next_token += 1;
                                if let Err(e) =
                                    poll.registry()
                                        .register(&mut stream, token, Interest::READABLE)
                                {
                                    error!("Failed to register {}: {}", addr, e);
                                    continue;
                                }

                                let connection = Connection::new(next_client_id, Some(addr), &config);
                                debug!("Client {} connected from {}", next_client_id, addr);
                                next_client_id += 1;

                                connections.insert(token, (stream, connection));
                                executor.stats_mut().connected_clients = connections.len() as u64;
                            }
                            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                            Err(e) => {
                                error!("Error accepting connection: {}", e);
                                break;
                            }
                        }
                    },
                    WAKER => {}
                    token => serve_client(
                        poll.registry(),
                        token,
                        event.is_readable(),
                        &mut connections,
                        &mut ready,
                        &mut executor,
                        &mut read_buf,
                    ),
                }
            }

            // Give clients that hit their read budget another turn
            for token in std::mem::take(&mut ready) {
                if let Some((_, connection)) = connections.get_mut(&token) {
                    connection.ready = false;
                }
                serve_client(
                    poll.registry(),
                    token,
                    true,
                    &mut connections,
                    &mut ready,
                    &mut executor,
                    &mut read_buf,
                );
            }
        }

        // Cleanup
        for (_, (mut stream, _)) in connections {
            let _ = poll.registry().deregister(&mut stream);
        }

        info!("Server shutting down");
        Ok(())
    }
}

/// Serve one client and apply the resulting state
fn serve_client(
    registry: &Registry,
    token: Token,
    readable: bool,
    connections: &mut Clients,
    ready: &mut Vec<Token>,
    executor: &mut CommandExecutor,
    read_buf: &mut [u8],
) {
    let Some((stream, connection)) = connections.get_mut(&token) else {
        return;
    };

    match handle_client_event(registry, token, stream, connection, readable, executor, read_buf) {
        ClientState::Idle => {}
        ClientState::Ready => {
            if !connection.ready {
                connection.ready = true;
                ready.push(token);
            }
        }
        ClientState::Close => {
            if let Some((mut stream, connection)) = connections.remove(&token) {
                let _ = registry.deregister(&mut stream);
                debug!(
                    "Client {} closed after {} commands",
                    connection.id(),
                    connection.commands_processed
                );
                executor.stats_mut().connected_clients = connections.len() as u64;
            }
        }
    }
}

/// Read up to the per-event budget, run every complete command, then flush
/// replies once.
fn handle_client_event(
    registry: &Registry,
    token: Token,
    stream: &mut MioTcpStream,
    connection: &mut Connection,
    readable: bool,
    executor: &mut CommandExecutor,
    read_buf: &mut [u8],
) -> ClientState {
    let mut more_input = false;

    if readable && !connection.is_closing() {
        let mut reads = 0;
        loop {
            if connection.pending_len() >= OUTPUT_HIGH_WATER {
                connection.read_paused = true;
                break;
            }
            if reads == MAX_READS_PER_EVENT {
                more_input = true;
                break;
            }

            match stream.read(read_buf) {
                Ok(0) => {
                    connection.finish_input();
                    break;
                }
                Ok(n) => {
                    reads += 1;
                    let stats = executor.stats_mut();
                    stats.total_read_calls += 1;
                    stats.total_net_input_bytes += n as u64;
                    connection.process_read(&read_buf[..n], executor);
                    if connection.is_closing() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    if e.kind() != ErrorKind::ConnectionReset {
                        error!("Error reading from client {}: {}", connection.id(), e);
                    }
                    return ClientState::Close;
                }
            }
        }
    }

    if connection.take_batch() > 0 {
        executor.stats_mut().total_batches += 1;
    }

    let progress = match connection.flush(stream) {
        Ok(progress) => progress,
        Err(e) => {
            if e.kind() != ErrorKind::BrokenPipe && e.kind() != ErrorKind::ConnectionReset {
                error!("Error writing to client {}: {}", connection.id(), e);
            }
            return ClientState::Close;
        }
    };
    let stats = executor.stats_mut();
    stats.total_write_calls += progress.calls;
    stats.total_net_output_bytes += progress.bytes as u64;

    // QUIT, protocol errors and peer EOF all wait for queued replies
    if connection.is_closing() && progress.drained {
        return ClientState::Close;
    }

    // The readable edge was consumed while paused, so resume explicitly
    if connection.read_paused && connection.pending_len() < OUTPUT_HIGH_WATER {
        connection.read_paused = false;
        more_input = !connection.is_closing();
    }

    let want_write = !progress.drained;
    if want_write != connection.write_interest {
        let interest = if want_write {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        if let Err(e) = registry.reregister(stream, token, interest) {
            error!("Failed to reregister client {}: {}", connection.id(), e);
            return ClientState::Close;
        }
        connection.write_interest = want_write;
    }

    if more_input {
        ClientState::Ready
    } else {
        ClientState::Idle
    }
}
