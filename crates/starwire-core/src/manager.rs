//! One client connection to one device server.
//!
//! A [`Manager`] owns the socket, the codec state and the device model of a
//! single endpoint. Its receive loop ([`Manager::run`]) is the only place
//! the model is mutated. Outbound commands go through cloned
//! [`CommandSender`] handles that share the write half with the manager
//! behind a mutex; the same mutex guards connection state transitions.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use starwire_proto::{
    CodecError, InboundCommand, OutboundCommand, OutboundFrame, ParseError, XmlCodec,
    encode_payload,
};
use starwire_types::{Device, DeviceDescriptor, ManagerId, PropertyVector};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConnectionConfig, ProtocolConfig, ServerConfig};
use crate::dispatch::Dispatcher;
use crate::event::{ConnectionState, EventSender, ManagerEvent};
use crate::labels::NamingAuthority;
use crate::server::ServerProcess;
use crate::{Error, Result};

type Writer = FramedWrite<OwnedWriteHalf, XmlCodec>;
type Reader = FramedRead<OwnedReadHalf, XmlCodec>;
type Frame = std::result::Result<std::result::Result<InboundCommand, ParseError>, CodecError>;

/// How the server at the other end came to be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Spawned by this manager on the local machine
    Local,
    /// Already running somewhere; we only attach
    #[default]
    Remote,
}

/// State shared between the manager and its senders.
struct Link {
    state: ConnectionState,
    writer: Option<Writer>,
    cancel: CancellationToken,
}

impl Link {
    fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            writer: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// What woke the receive loop
enum Step {
    Cancelled,
    ServerLine(Option<String>),
    Frame(Option<Frame>),
}

pub struct Manager {
    id: ManagerId,
    mode: ConnectionMode,
    connection: ConnectionConfig,
    protocol: ProtocolConfig,
    server_settings: ServerConfig,
    dispatcher: Dispatcher,
    link: Arc<Mutex<Link>>,
    reader: Option<Reader>,
    server: Option<ServerProcess>,
    server_output: Option<mpsc::UnboundedReceiver<String>>,
    events: EventSender,
}

impl Manager {
    /// Create a manager for `host:port` with default settings.
    #[must_use]
    pub fn new(
        id: ManagerId,
        host: impl Into<String>,
        port: u16,
        naming: Arc<dyn NamingAuthority>,
        events: EventSender,
    ) -> Self {
        let connection = ConnectionConfig {
            host: host.into(),
            port,
            ..ConnectionConfig::default()
        };
        let config = Config {
            connection,
            ..Config::default()
        };
        Self::from_config(id, &config, naming, events)
    }

    /// Create a manager from loaded configuration.
    #[must_use]
    pub fn from_config(
        id: ManagerId,
        config: &Config,
        naming: Arc<dyn NamingAuthority>,
        events: EventSender,
    ) -> Self {
        let dispatcher = Dispatcher::new(id, naming, events.clone())
            .with_timestamp_format(config.messages.timestamp_format.clone());

        Self {
            id,
            mode: ConnectionMode::default(),
            connection: config.connection.clone(),
            protocol: config.protocol.clone(),
            server_settings: config.server.clone(),
            dispatcher,
            link: Arc::new(Mutex::new(Link::new())),
            reader: None,
            server: None,
            server_output: None,
            events,
        }
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: ConnectionMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub const fn id(&self) -> ManagerId {
        self.id
    }

    #[must_use]
    pub const fn mode(&self) -> ConnectionMode {
        self.mode
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.connection.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.connection.port
    }

    pub fn add_descriptor(&mut self, descriptor: DeviceDescriptor) {
        self.dispatcher.add_descriptor(descriptor);
    }

    pub fn add_descriptors(&mut self, descriptors: impl IntoIterator<Item = DeviceDescriptor>) {
        for descriptor in descriptors {
            self.add_descriptor(descriptor);
        }
    }

    #[must_use]
    pub fn descriptors(&self) -> &[DeviceDescriptor] {
        self.dispatcher.descriptors()
    }

    /// Devices discovered on the current connection, in discovery order.
    #[must_use]
    pub fn devices(&self) -> &[Device] {
        self.dispatcher.devices()
    }

    #[must_use]
    pub fn device(&self, name: &str) -> Option<&Device> {
        self.dispatcher.find(name)
    }

    #[must_use]
    pub fn property(&self, device: &str, name: &str) -> Option<&PropertyVector> {
        self.device(device)?.property(name)
    }

    pub async fn state(&self) -> ConnectionState {
        self.link.lock().await.state
    }

    /// A handle for sending commands from other tasks.
    #[must_use]
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            manager: self.id,
            link: Arc::clone(&self.link),
            events: self.events.clone(),
        }
    }

    /// Spawn the local server with one driver per descriptor.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoDevices` if no descriptors were added, or a process
    /// error if the server cannot be started.
    pub fn start_server(&mut self) -> Result<u32> {
        if self.descriptors().is_empty() {
            return Err(Error::NoDevices);
        }

        let drivers: Vec<String> = self.descriptors().iter().map(|d| d.driver.clone()).collect();
        let mut server = ServerProcess::spawn(
            &self.server_settings.binary,
            self.connection.port,
            &drivers,
            self.server_settings.verbose,
        )?;

        let pid = server
            .pid()
            .ok_or_else(|| Error::Process("Server exited before it started".to_string()))?;
        info!(manager = %self.id, pid, "Server started");

        self.server_output = server.take_output();
        self.server = Some(server);
        Ok(pid)
    }

    /// Connect and perform the handshake.
    ///
    /// In local mode the server is started first if it is not running yet.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoDevices` before touching the network if no
    /// descriptors were added, `Error::AlreadyConnected` unless the manager
    /// is idle or failed, and `Error::Connect` once every attempt failed.
    pub async fn connect(&mut self) -> Result<()> {
        if self.descriptors().is_empty() {
            return Err(Error::NoDevices);
        }

        {
            let mut link = self.link.lock().await;
            if !matches!(link.state, ConnectionState::Idle | ConnectionState::Failed) {
                return Err(Error::AlreadyConnected);
            }
            link.state = ConnectionState::Connecting;
        }
        self.emit_state(ConnectionState::Connecting);

        if self.mode == ConnectionMode::Local
            && self.server.is_none()
            && let Err(e) = self.start_server()
        {
            self.fail(&e).await;
            return Err(e);
        }

        let stream = match self.open_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(&e).await;
                return Err(e);
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {e}");
        }

        let (read_half, write_half) = stream.into_split();
        let mut writer = FramedWrite::new(write_half, self.codec());

        self.dispatcher.start_all();

        if let Err(e) = self.handshake(&mut writer).await {
            self.fail(&e).await;
            return Err(e);
        }

        self.reader = Some(FramedRead::new(read_half, self.codec()));
        {
            let mut link = self.link.lock().await;
            link.writer = Some(writer);
            link.cancel = CancellationToken::new();
            link.state = ConnectionState::Connected;
        }

        info!(manager = %self.id, host = %self.connection.host, port = self.connection.port, "Connected");
        self.emit_state(ConnectionState::Connected);
        Ok(())
    }

    fn codec(&self) -> XmlCodec {
        XmlCodec::with_max_element_size(self.protocol.max_element_bytes)
    }

    async fn open_stream(&self) -> Result<TcpStream> {
        let host = self.connection.host.as_str();
        let port = self.connection.port;
        let attempts = self.connection.attempts.max(1);
        let mut made = 0;

        loop {
            made += 1;
            debug!(host, port, attempt = made, "Connecting");

            let source = match tokio::time::timeout(
                self.connection.timeout(),
                TcpStream::connect((host, port)),
            )
            .await
            {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => e,
                Err(_) => io::Error::new(io::ErrorKind::TimedOut, "connection attempt timed out"),
            };

            warn!(host, port, attempt = made, "Connection attempt failed: {source}");

            if made >= attempts {
                return Err(Error::Connect {
                    host: host.to_string(),
                    port,
                    attempts: made,
                    source,
                });
            }

            tokio::time::sleep(self.connection.retry_delay()).await;
        }
    }

    async fn handshake(&self, writer: &mut Writer) -> Result<()> {
        writer
            .feed(OutboundCommand::enable_blob(self.protocol.blob_policy).into())
            .await?;
        writer
            .feed(OutboundCommand::get_properties(self.protocol.version.clone()).into())
            .await?;
        writer.flush().await?;
        debug!(manager = %self.id, "Handshake sent");
        Ok(())
    }

    /// Process inbound commands until the connection ends.
    ///
    /// Returns `Ok` after a requested disconnect. On EOF or a read error the
    /// connection is torn down, the manager enters `Failed` and the transport
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` if called without a connection, or
    /// `Error::Transport` if the connection is lost.
    pub async fn run(&mut self) -> Result<()> {
        let mut reader = self.reader.take().ok_or(Error::NotConnected)?;
        let cancel = self.link.lock().await.cancel.clone();

        let result = loop {
            let step = tokio::select! {
                biased;
                () = cancel.cancelled() => Step::Cancelled,
                line = next_line(&mut self.server_output) => Step::ServerLine(line),
                frame = reader.next() => Step::Frame(frame),
            };

            match step {
                Step::Cancelled => break Ok(()),
                Step::ServerLine(Some(line)) => self.emit(ManagerEvent::ServerOutput {
                    manager: self.id,
                    line,
                }),
                Step::ServerLine(None) => {
                    info!(manager = %self.id, "Server output closed");
                    self.server_output = None;
                }
                Step::Frame(Some(Ok(Ok(command)))) => {
                    if cancel.is_cancelled() {
                        break Ok(());
                    }
                    self.handle(&command);
                }
                Step::Frame(Some(Ok(Err(e)))) => {
                    warn!(manager = %self.id, "Parse error: {e}");
                    self.emit(ManagerEvent::ProtocolError {
                        manager: self.id,
                        error: e.to_string(),
                    });
                }
                Step::Frame(Some(Err(e))) => break Err(self.transport_error(io_error(e))),
                Step::Frame(None) => {
                    break Err(self.transport_error(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "server closed the connection",
                    )));
                }
            }
        };

        match &result {
            Ok(()) => self.teardown(ConnectionState::Idle).await,
            Err(e) => {
                error!(manager = %self.id, "{e}");
                self.emit(ManagerEvent::ConnectionError {
                    manager: self.id,
                    host: self.connection.host.clone(),
                    port: self.connection.port,
                    error: e.to_string(),
                });
                self.teardown(ConnectionState::Failed).await;
            }
        }

        result
    }

    /// Disconnect a manager whose receive loop is not running.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` if the manager is not connected.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.sender().disconnect().await?;
        self.teardown(ConnectionState::Idle).await;
        Ok(())
    }

    /// Stop the local server, if this manager started one.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be killed.
    pub async fn stop_server(&mut self) -> Result<()> {
        self.server_output = None;
        if let Some(mut server) = self.server.take() {
            server.kill().await?;
            info!(manager = %self.id, "Server stopped");
        }
        Ok(())
    }

    fn handle(&mut self, command: &InboundCommand) {
        if let Err(e) = self.dispatcher.dispatch(command) {
            let raw = command.to_element().to_xml();
            warn!(manager = %self.id, device = command.device().unwrap_or("-"), "{e}: {raw}");
            self.emit(ManagerEvent::ProtocolError {
                manager: self.id,
                error: e.to_string(),
            });
        }
    }

    fn transport_error(&self, source: io::Error) -> Error {
        Error::Transport {
            host: self.connection.host.clone(),
            port: self.connection.port,
            source,
        }
    }

    /// Close the socket, drop the parser and every device, then settle in
    /// `next`.
    async fn teardown(&mut self, next: ConnectionState) {
        let (writer, requested) = {
            let mut link = self.link.lock().await;
            let requested = link.state == ConnectionState::Closing;
            link.state = ConnectionState::Closing;
            link.cancel.cancel();
            (link.writer.take(), requested)
        };
        // A sender's disconnect already announced Closing
        if !requested {
            self.emit_state(ConnectionState::Closing);
        }

        if let Some(mut writer) = writer
            && let Err(e) = writer.close().await
        {
            debug!(manager = %self.id, "Error closing connection: {e}");
        }
        self.reader = None;
        self.dispatcher.clear();

        self.link.lock().await.state = next;
        info!(manager = %self.id, state = %next, "Connection closed");
        self.emit_state(next);
    }

    async fn fail(&mut self, error: &Error) {
        error!(manager = %self.id, "{error}");
        self.link.lock().await.state = ConnectionState::Failed;
        self.emit(ManagerEvent::ConnectionError {
            manager: self.id,
            host: self.connection.host.clone(),
            port: self.connection.port,
            error: error.to_string(),
        });
        self.emit_state(ConnectionState::Failed);
    }

    fn emit_state(&self, state: ConnectionState) {
        self.emit(ManagerEvent::StateChanged {
            manager: self.id,
            state,
        });
    }

    fn emit(&self, event: ManagerEvent) {
        let _ = self.events.send(event);
    }
}

async fn next_line(output: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match output {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn io_error(error: CodecError) -> io::Error {
    match error {
        CodecError::Io(e) => e,
        other => io::Error::other(other),
    }
}

/// Sends commands on a manager's connection. Cheap to clone.
#[derive(Clone)]
pub struct CommandSender {
    manager: ManagerId,
    link: Arc<Mutex<Link>>,
    events: EventSender,
}

impl CommandSender {
    #[must_use]
    pub const fn manager(&self) -> ManagerId {
        self.manager
    }

    pub async fn state(&self) -> ConnectionState {
        self.link.lock().await.state
    }

    /// Write frames back to back, holding the lock for all of them.
    async fn send(&self, frames: Vec<OutboundFrame>) -> Result<()> {
        let mut link = self.link.lock().await;
        if link.state != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }
        let writer = link.writer.as_mut().ok_or(Error::NotConnected)?;

        for frame in frames {
            writer.feed(frame).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Send every element of a text vector.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` unless connected, `Error::Command` if
    /// the vector is not a text vector, or a codec error if writing fails.
    pub async fn send_new_text(&self, device: &str, vector: &PropertyVector) -> Result<()> {
        let command = OutboundCommand::new_text(device, vector)?;
        debug!(manager = %self.manager, device, property = %vector.name, "Sending text vector");
        self.send(vec![command.into()]).await
    }

    /// Send every element of a number vector.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` unless connected, `Error::Command` if
    /// the vector is not a number vector, or a codec error if writing fails.
    pub async fn send_new_number(&self, device: &str, vector: &PropertyVector) -> Result<()> {
        let command = OutboundCommand::new_number(device, vector)?;
        debug!(manager = %self.manager, device, property = %vector.name, "Sending number vector");
        self.send(vec![command.into()]).await
    }

    /// Send one switch element of a switch vector.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` unless connected, `Error::Command` if
    /// the vector is not a switch vector or lacks `element`, or a codec
    /// error if writing fails.
    pub async fn send_new_switch(
        &self,
        device: &str,
        vector: &PropertyVector,
        element: &str,
    ) -> Result<()> {
        let command = OutboundCommand::new_switch(device, vector, element)?;
        debug!(manager = %self.manager, device, property = %vector.name, element, "Sending switch");
        self.send(vec![command.into()]).await
    }

    /// Open a blob upload. `timestamp` defaults to the current UTC time.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` unless connected, or
    /// `Error::Blob` if another upload is still open.
    pub async fn start_blob(
        &self,
        device: &str,
        property: &str,
        timestamp: Option<&str>,
    ) -> Result<()> {
        let timestamp = timestamp.map_or_else(utc_timestamp, str::to_string);
        self.send(vec![OutboundFrame::BlobStart {
            device: device.to_string(),
            property: property.to_string(),
            timestamp,
        }])
        .await
    }

    /// Append one already encoded element to the open upload.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` unless connected, or
    /// `Error::Blob` if no upload is open.
    pub async fn send_one_blob(
        &self,
        name: &str,
        size: usize,
        format: &str,
        encoded: impl Into<Bytes>,
    ) -> Result<()> {
        self.send(vec![OutboundFrame::BlobChunk {
            name: name.to_string(),
            size,
            format: format.to_string(),
            encoded: encoded.into(),
        }])
        .await
    }

    /// Close the open upload.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` unless connected, or
    /// `Error::Blob` if no upload is open.
    pub async fn finish_blob(&self) -> Result<()> {
        self.send(vec![OutboundFrame::BlobFinish]).await
    }

    /// Encode `raw` and upload it as a single element in one transfer.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` unless connected, or `Error::Blob` if
    /// another upload is still open.
    pub async fn send_blob(
        &self,
        device: &str,
        property: &str,
        element: &str,
        format: &str,
        raw: &[u8],
    ) -> Result<()> {
        let encoded = encode_payload(raw);
        info!(
            manager = %self.manager,
            device,
            property,
            element,
            size = raw.len(),
            "Uploading blob"
        );
        self.send(vec![
            OutboundFrame::BlobStart {
                device: device.to_string(),
                property: property.to_string(),
                timestamp: utc_timestamp(),
            },
            OutboundFrame::BlobChunk {
                name: element.to_string(),
                size: raw.len(),
                format: format.to_string(),
                encoded: Bytes::from(encoded),
            },
            OutboundFrame::BlobFinish,
        ])
        .await
    }

    /// Request teardown. The receive loop stops before handling any further
    /// buffered command.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` if the manager is not connected.
    pub async fn disconnect(&self) -> Result<()> {
        let writer = {
            let mut link = self.link.lock().await;
            if link.state != ConnectionState::Connected {
                return Err(Error::NotConnected);
            }
            link.state = ConnectionState::Closing;
            link.cancel.cancel();
            link.writer.take()
        };
        info!(manager = %self.manager, "Disconnecting");
        let _ = self.events.send(ManagerEvent::StateChanged {
            manager: self.manager,
            state: ConnectionState::Closing,
        });

        if let Some(mut writer) = writer
            && let Err(e) = writer.close().await
        {
            debug!(manager = %self.manager, "Error closing connection: {e}");
        }
        Ok(())
    }
}

fn utc_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}
