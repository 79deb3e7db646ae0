use log::{debug, info};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::auth::authenticate;
use crate::engine::Engine;
use crate::ids::{IdAllocator, MAX_IN_FLIGHT};
use crate::packet::{Packet, PacketType, MAX_BODY_SIZE};
use crate::writer::{write_loop, WriteRequest};
use crate::{Config, ErrorKind, RconError};

/// Connect to an RCON server and authenticate.
///
/// A connection that can't be opened fails with [`ErrorKind::Connect`]. A password the server
/// rejects fails with [`ErrorKind::IncorrectPassword`].
///
/// # Example
/// ```rust,no_run
/// use squad_rcon_client::{connect, Config, ErrorKind};
///
/// #[tokio::main]
/// async fn main() {
///     match connect("localhost:21114", "password123", Config::default()).await {
///         Ok(client) => println!("{}", client.execute("ListSquads").await.unwrap()),
///         Err(err) if err.kind() == ErrorKind::IncorrectPassword => eprintln!("Wrong password"),
///         Err(err) => panic!("Connection failed: {}", err),
///     }
/// }
/// ```
pub async fn connect<A: ToSocketAddrs>(
    addr: A,
    password: &str,
    config: Config,
) -> crate::Result<Client> {
    Client::connect(addr, password, config).await
}

/// An authenticated RCON connection.
///
/// Commands can be executed concurrently from several tasks, e.g. by sharing the client in an
/// [`Arc`]. At most [`MAX_IN_FLIGHT`](crate::MAX_IN_FLIGHT) commands can be waiting for a
/// response at the same time.
pub struct Client {
    config: Config,
    peer_addr: SocketAddr,
    ids: IdAllocator,
    engine: Arc<Engine>,
    writes: mpsc::Sender<WriteRequest>,
    reader: Arc<JoinHandle<crate::Error>>,
    writer: JoinHandle<()>,
    closed: AtomicBool,
}

impl Client {
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        password: &str,
        config: Config,
    ) -> crate::Result<Self> {
        config.validate()?;

        let stream = if config.dial_timeout.is_zero() {
            TcpStream::connect(addr).await.map_err(RconError::Connect)?
        } else {
            tokio::time::timeout(config.dial_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| RconError::ConnectTimeout(config.dial_timeout))?
                .map_err(RconError::Connect)?
        };
        let peer_addr = stream.peer_addr()?;

        let (read, mut write) = stream.into_split();
        let mut read = BufReader::new(read);

        let engine = Arc::new(Engine::new());
        let ids = IdAllocator::new(config.start_id);

        // Dropping the stream on failure closes the connection
        let auth_id = ids.next_id();
        authenticate(
            &engine,
            &mut read,
            &mut write,
            auth_id,
            password,
            config.write_timeout,
        )
        .await?;
        info!("Authenticated with {}", peer_addr);

        let reader = Arc::new(tokio::spawn({
            let engine = engine.clone();
            async move { engine.run(read).await }
        }));

        let (writes, requests) = mpsc::channel(MAX_IN_FLIGHT);
        let writer = tokio::spawn(write_loop(
            write,
            requests,
            engine.clone(),
            reader.clone(),
            config.write_timeout,
        ));

        Ok(Client {
            config,
            peer_addr,
            ids,
            engine,
            writes,
            reader,
            writer,
            closed: AtomicBool::new(false),
        })
    }

    /// Executes a command and waits for its complete response.
    ///
    /// Dropping the returned future abandons the command; its response is discarded when it
    /// arrives. A command that has started being written is still written completely.
    pub async fn execute(&self, command: &str) -> crate::Result<String> {
        if command.is_empty() {
            return Err(RconError::EmptyCommand.into());
        }
        if command.len() > MAX_BODY_SIZE {
            return Err(RconError::CommandTooLong {
                len: command.len(),
                max: MAX_BODY_SIZE,
            }
            .into());
        }
        if !self.engine.is_authenticated() {
            return Err(RconError::NotAuthenticated.into());
        }

        let id = self.ids.next_id();
        let mut pending = self.engine.callbacks().register(id)?;
        debug!("Executing command {:?}, ID: {}", command, pending.id());

        // Send a short command with id + 1 after each command. When the response to this command
        // arrives, all the responses of the previous command have arrived.
        let mut buf = Vec::new();
        Packet::new(PacketType::EXEC_COMMAND, id, command).write_to(&mut buf);
        Packet::new(
            PacketType::EXEC_COMMAND,
            id + 1,
            self.config.confirmation_command.as_str(),
        )
        .write_to(&mut buf);

        let (done, written) = oneshot::channel();
        if self.writes.send(WriteRequest { buf, done }).await.is_err() {
            return Err(self.engine.callbacks().closed_error());
        }
        match written.await {
            Ok(res) => res?,
            Err(_) => return Err(self.engine.callbacks().closed_error()),
        }

        pending.response(self.config.response_timeout).await
    }

    /// Closes the connection.
    ///
    /// Commands still waiting for a response fail with [`ErrorKind::TransportClosed`]. Closing a
    /// closed client does nothing.
    ///
    /// This doesn't wait for a write that is stuck on a full socket, the connection is dropped
    /// instead.
    pub async fn close(&self) -> crate::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.reader.abort();
        self.engine
            .callbacks()
            .fail_all(ErrorKind::TransportClosed, "connection closed by client");

        // Dropping the write half shuts down the connection
        self.writer.abort();
        debug!("Closed connection to {}", self.peer_addr);
        Ok(())
    }

    /// Whether the connection has been closed or lost.
    pub fn is_closed(&self) -> bool {
        self.engine.callbacks().is_closed()
    }

    /// Number of commands waiting for a response.
    pub fn in_flight(&self) -> usize {
        self.engine.callbacks().len()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer_addr", &self.peer_addr)
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish()
    }
}
