//! Connection management.
//!
//! A [`Connection`] owns one stream to the server. Outbound packets are
//! numbered by its [`Sequencer`] and written under a single writer lock,
//! so sequence numbers reach the wire in increasing order. A background
//! task reads frames, hands replies to whoever is waiting on them and
//! broadcasts everything else as spontaneous packets.

use crate::error::ClientError;
use crate::sequencer::{ConnectionStatus, Sequencer};
use crate::stream::{self, BoxedStream};
use crate::tls::TlsClientConfig;
use bytes::BytesMut;
use parley_protocol::packet::Identification;
use parley_protocol::{Decoder, Encoder, FrameOptions, Packet, UnknownFields, DEFAULT_PORT};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default capacity of the spontaneous packet channel.
const SPONTANEOUS_CHANNEL_CAPACITY: usize = 256;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Bound on TCP connect plus TLS handshake.
    pub connect_timeout: Duration,
    /// How long [`Connection::request`] waits for a reply.
    pub request_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Outbound compression settings.
    pub frame: FrameOptions,
    /// Policy for entity fields this client does not model.
    pub unknown_fields: UnknownFields,
    /// TLS configuration (optional).
    pub tls: Option<TlsClientConfig>,
    /// Send an `Identification` packet before anything else.
    pub identify: bool,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            frame: FrameOptions::default(),
            unknown_fields: UnknownFields::default(),
            tls: None,
            identify: true,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.frame.compression = enabled;
        self
    }

    pub fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.frame.compression_threshold = threshold;
        self
    }

    pub fn with_unknown_fields(mut self, policy: UnknownFields) -> Self {
        self.unknown_fields = policy;
        self
    }

    pub fn with_tls(mut self, tls_config: TlsClientConfig) -> Self {
        self.tls = Some(tls_config);
        self
    }

    pub fn with_identify(mut self, identify: bool) -> Self {
        self.identify = identify;
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

type Completion = oneshot::Sender<Packet>;

struct State {
    sequencer: Sequencer<Completion>,
    /// Bumped on every connect attempt and teardown so that a stale
    /// reader or connect cannot act on a newer connection.
    epoch: u64,
    reader: Option<JoinHandle<()>>,
}

struct Shared {
    config: ConnectionConfig,
    state: parking_lot::Mutex<State>,
    /// Write half tagged with the epoch it belongs to.
    writer: Mutex<Option<(u64, WriteHalf<BoxedStream>)>>,
    status: watch::Sender<ConnectionStatus>,
    spontaneous: broadcast::Sender<Packet>,
}

/// A connection to a parley server. Cloning yields another handle to the
/// same connection.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (spontaneous, _) = broadcast::channel(SPONTANEOUS_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                state: parking_lot::Mutex::new(State {
                    sequencer: Sequencer::new(),
                    epoch: 0,
                    reader: None,
                }),
                writer: Mutex::new(None),
                status,
                spontaneous,
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.state.lock().sequencer.status()
    }

    /// Watches connection status transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Receives packets that are not replies to anything this client is
    /// waiting on (server pushes).
    pub fn subscribe_spontaneous(&self) -> broadcast::Receiver<Packet> {
        self.shared.spontaneous.subscribe()
    }

    /// Number of sends still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().sequencer.pending_count()
    }

    /// Number of packets waiting for the connection to come up.
    pub fn queued_count(&self) -> usize {
        self.shared.state.lock().sequencer.queued_count()
    }

    /// Connects to the server.
    ///
    /// If another connect is already in progress this waits for it and
    /// reports its outcome. Returns immediately when already connected.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let epoch = {
            let mut state = self.shared.state.lock();
            if state.sequencer.begin_connect() {
                state.epoch += 1;
                self.shared.status.send_replace(ConnectionStatus::Connecting);
                Some(state.epoch)
            } else {
                None
            }
        };

        let Some(epoch) = epoch else {
            return self.await_settled().await;
        };

        let config = &self.shared.config;
        tracing::info!("Connecting to {}:{}", config.host, config.port);
        let stream = match stream::open(
            &config.host,
            config.port,
            config.tls.as_ref(),
            config.connect_timeout,
        )
        .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Connection to {}:{} failed: {}", config.host, config.port, e);
                self.shared.teardown(epoch, "connect failed", true).await;
                return Err(e);
            }
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let mut writer = self.shared.writer.lock().await;

        let batch = {
            let mut state = self.shared.state.lock();
            if state.epoch != epoch {
                // closed while connecting
                return Err(ClientError::ConnectionLost);
            }
            let reader = tokio::spawn(read_loop(self.shared.clone(), read_half, epoch));
            state.reader = Some(reader);
            state.sequencer.mark_connected();
            self.shared.status.send_replace(ConnectionStatus::Connected);

            let mut batch = Vec::new();
            if config.identify {
                let mut hello = Packet::new(Identification::current(config.frame.compression));
                state.sequencer.assign(&mut hello, None);
                batch.push(hello);
            }
            for (mut packet, completion) in state.sequencer.drain_queue() {
                state.sequencer.assign(&mut packet, completion);
                batch.push(packet);
            }
            batch
        };

        tracing::info!("Connected to {}:{}", config.host, config.port);

        let mut bytes = BytesMut::new();
        for packet in &batch {
            match Encoder::encode_packet(packet, &config.frame) {
                Ok(encoded) => bytes.extend_from_slice(&encoded),
                // queued packets were checked on submit
                Err(e) => tracing::warn!("Dropping {}: {}", packet.packet_type(), e),
            }
        }
        let (_, write_half) = writer.insert((epoch, write_half));
        if bytes.is_empty() {
            return Ok(());
        }

        tracing::debug!("Flushing {} packets ({} bytes)", batch.len(), bytes.len());
        let result = write_half.write_all(&bytes).await;
        drop(writer);
        if let Err(e) = result {
            self.shared.teardown(epoch, "write failed", true).await;
            return Err(ClientError::Io(e));
        }
        Ok(())
    }

    async fn await_settled(&self) -> Result<(), ClientError> {
        let mut status = self.subscribe_status();
        let settled = status
            .wait_for(|s| *s != ConnectionStatus::Connecting)
            .await
            .map(|s| *s)
            .unwrap_or(ConnectionStatus::Disconnected);
        match settled {
            ConnectionStatus::Connected => Ok(()),
            _ => Err(ClientError::ConnectionLost),
        }
    }

    /// Sends a packet without waiting for a reply.
    ///
    /// While disconnected the packet is queued and a connect is started in
    /// the background; queued packets go out in submission order once the
    /// connection is up.
    pub async fn send(&self, packet: Packet) -> Result<(), ClientError> {
        self.submit(packet, None).await
    }

    /// Sends a packet and waits for the reply to it.
    pub async fn request(&self, packet: Packet) -> Result<Packet, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.submit(packet, Some(tx)).await?;

        match tokio::time::timeout(self.shared.config.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Err(_) => {
                // rx is gone, so its sender now reports closed
                self.shared
                    .state
                    .lock()
                    .sequencer
                    .retain(|tx| !tx.is_closed());
                tracing::debug!("Request timed out");
                Err(ClientError::Timeout)
            }
        }
    }

    async fn submit(&self, mut packet: Packet, completion: Option<Completion>) -> Result<(), ClientError> {
        let mut writer = self.shared.writer.lock().await;

        let (epoch, seq, connect) = {
            let mut state = self.shared.state.lock();
            match state.sequencer.status() {
                ConnectionStatus::Connected => {
                    let seq = state.sequencer.assign(&mut packet, completion);
                    (state.epoch, Some(seq), false)
                }
                status => {
                    // surface encoding errors now rather than at flush time
                    packet.encode()?;
                    tracing::debug!("Queueing {} while {:?}", packet.packet_type(), status);
                    state.sequencer.enqueue(packet.clone(), completion);
                    (state.epoch, None, status == ConnectionStatus::Disconnected)
                }
            }
        };

        let Some(seq) = seq else {
            drop(writer);
            if connect {
                let conn = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = conn.connect().await {
                        tracing::warn!("Background connect failed: {}", e);
                    }
                });
            }
            return Ok(());
        };

        let encoded = match Encoder::encode_packet(&packet, &self.shared.config.frame) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.shared.state.lock().sequencer.forget(seq);
                return Err(e.into());
            }
        };

        let write_half = match writer.as_mut() {
            Some((writer_epoch, half)) if *writer_epoch == epoch => half,
            _ => {
                self.shared.state.lock().sequencer.forget(seq);
                return Err(ClientError::NotConnected);
            }
        };

        tracing::debug!(
            "Sending {} seq={} ({} bytes)",
            packet.packet_type(),
            seq,
            encoded.len()
        );
        let result = write_half.write_all(&encoded).await;
        drop(writer);
        if let Err(e) = result {
            self.shared.teardown(epoch, "write failed", true).await;
            return Err(ClientError::Io(e));
        }
        Ok(())
    }

    /// Closes the connection. Pending requests fail with `ConnectionLost`
    /// and queued packets are discarded.
    pub async fn close(&self) {
        let epoch = self.shared.state.lock().epoch;
        self.shared.teardown(epoch, "closed by client", true).await;
    }
}

impl Shared {
    /// Resets all connection state if `epoch` is still current. The
    /// reader task passes `abort_reader = false` since it is exiting.
    async fn teardown(&self, epoch: u64, reason: &str, abort_reader: bool) {
        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return;
            }
            state.epoch += 1;
            if let Some(reader) = state.reader.take() {
                if abort_reader {
                    reader.abort();
                }
            }

            let pending = state.sequencer.pending_count();
            let queued = state.sequencer.queued_count();
            if queued > 0 {
                tracing::warn!("Dropping {} queued packets", queued);
            }
            tracing::info!(
                "Connection closed ({}), {} requests abandoned",
                reason,
                pending
            );
            state.sequencer.reset();
            self.status.send_replace(ConnectionStatus::Disconnected);
        }

        let mut writer = self.writer.lock().await;
        if matches!(writer.as_ref(), Some((owner, _)) if *owner == epoch) {
            if let Some((_, mut half)) = writer.take() {
                let _ = half.shutdown().await;
            }
        }
    }

    fn dispatch(&self, packet: Packet) {
        let completion = self.state.lock().sequencer.resolve(&packet);
        match completion {
            Some(tx) => {
                tracing::debug!("Reply {} to seq={}", packet.packet_type(), packet.reply_to);
                // the caller may have timed out already
                let _ = tx.send(packet);
            }
            None => {
                if packet.is_reply() {
                    tracing::warn!(
                        "No pending request for reply {} to seq={}",
                        packet.packet_type(),
                        packet.reply_to
                    );
                } else {
                    tracing::debug!("Spontaneous {} seq={}", packet.packet_type(), packet.seq);
                }
                // no subscribers is fine
                let _ = self.spontaneous.send(packet);
            }
        }
    }
}

/// Reads and dispatches inbound packets until the stream ends or a
/// packet fails to decode, then tears the connection down.
async fn read_loop(shared: Arc<Shared>, mut reader: ReadHalf<BoxedStream>, epoch: u64) {
    let mut decoder = Decoder::with_unknown_fields(shared.config.unknown_fields);
    let mut buf = vec![0u8; shared.config.read_buffer_size];

    let reason = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break "closed by server".to_string(),
            Ok(n) => n,
            Err(e) => break format!("read failed: {}", e),
        };
        decoder.extend(&buf[..n]);

        let mut failure = None;
        loop {
            match decoder.decode_packet() {
                Ok(Some(packet)) => shared.dispatch(packet),
                Ok(None) => break,
                Err(e) => {
                    failure = Some(format!("decode failed: {}", e));
                    break;
                }
            }
        }
        if let Some(reason) = failure {
            // no resynchronization point in the stream
            break reason;
        }
    };

    tracing::debug!("read_loop exiting: {}", reason);
    shared.teardown(epoch, &reason, false).await;
}
