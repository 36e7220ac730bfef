//! Command transport over an open device channel.
//!
//! Payloads are opaque; framing belongs to the caller. The device protocol
//! carries no request ids, so a transport handles one request at a time
//! and assumes responses arrive in request order.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use log::{debug, error, log_enabled, trace, warn, Level};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::{timeout, timeout_at};
use tokio_util::codec::Decoder;

use crate::error::{Error, Result};
use crate::session::{DeviceSession, DisconnectHandle};

mod config;
mod types;

pub use config::*;
pub use types::*;

enum WaitOutcome {
    Read(std::io::Result<usize>),
    Disconnected,
}

pub struct CommandTransport<T> {
    session: DeviceSession<T>,
    config: TransportConfig,
    state: TransportState,
    needs_drain: bool,
}

impl<T: AsyncRead + AsyncWrite + Unpin> CommandTransport<T> {
    pub fn new(session: DeviceSession<T>, config: TransportConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            session,
            config,
            state: TransportState::Idle,
            needs_drain: false,
        })
    }

    /// Builds a transport over an already open channel with default settings.
    pub fn with_channel(channel: T) -> Self {
        Self {
            session: DeviceSession::open_with(channel),
            config: TransportConfig::default(),
            state: TransportState::Idle,
            needs_drain: false,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn session(&self) -> &DeviceSession<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut DeviceSession<T> {
        &mut self.session
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    /// Opens the session on a fresh channel.
    ///
    /// Input queued on the new channel is drained before the first request.
    pub fn open(&mut self, channel: T) {
        self.session.open(channel);
        self.state = TransportState::Idle;
        self.needs_drain = false;
    }

    pub fn close(&mut self) -> Option<T> {
        self.state = TransportState::Idle;
        self.session.close()
    }

    pub fn disconnect_handle(&self) -> DisconnectHandle {
        self.session.disconnect_handle()
    }

    pub fn into_session(self) -> DeviceSession<T> {
        self.session
    }

    /// Writes `payload` to the device without waiting for a reply.
    ///
    /// Resolves once the channel has accepted the bytes.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.recover_abandoned();
        self.write_payload(payload).await?;
        self.state = TransportState::Idle;
        Ok(())
    }

    /// Writes `payload` and waits up to `timeout` for the device to answer.
    ///
    /// The reply is whatever a single read of the channel returns, at most
    /// `max_response_len` bytes. Anything the device sent beyond that stays
    /// queued and is drained before the next request. Callers whose replies
    /// have framing should use
    /// [`send_and_await_frame`](Self::send_and_await_frame) instead.
    pub async fn send_and_await_response(
        &mut self,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Bytes> {
        self.begin_request(payload).await?;

        let pending = PendingRequest::new(payload, timeout);
        let mut buffer = BytesMut::zeroed(self.config.max_response_len);
        let result = match self.read_before(&pending, &mut buffer[..]).await {
            Ok(n) => {
                buffer.truncate(n);
                Ok(buffer.freeze())
            }
            Err(e) => Err(e),
        };
        self.finish_request(&pending, result.as_ref().err());

        if let Ok(response) = &result {
            debug!(
                "Received {} byte response after {:?}",
                response.len(),
                pending.elapsed()
            );
            if log_enabled!(Level::Trace) {
                trace!("Response: {:02x?}", &response[..]);
            }
        }

        result
    }

    /// Writes `payload` and reads until `decoder` yields one complete frame.
    ///
    /// All reads share the `timeout` deadline. A frame that does not
    /// complete within `max_response_len` bytes is an
    /// [`Error::InvalidResponse`]; one cut short by the deadline is an
    /// [`Error::Timeout`].
    pub async fn send_and_await_frame<D>(
        &mut self,
        payload: &[u8],
        timeout: Duration,
        decoder: &mut D,
    ) -> Result<D::Item>
    where
        D: Decoder<Error = Error>,
    {
        self.begin_request(payload).await?;

        let pending = PendingRequest::new(payload, timeout);
        let max = self.config.max_response_len;
        let mut buffer = BytesMut::with_capacity(max);
        let mut chunk = BytesMut::zeroed(max);

        let result = loop {
            match decoder.decode(&mut buffer) {
                Ok(Some(frame)) => break Ok(frame),
                Ok(None) => {}
                Err(e) => break Err(e),
            }
            if buffer.len() >= max {
                break Err(Error::InvalidResponse(format!(
                    "no complete frame within {} bytes",
                    max
                )));
            }

            let room = max - buffer.len();
            match self.read_before(&pending, &mut chunk[..room]).await {
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
                Err(e) => break Err(e),
            }
        };
        self.finish_request(&pending, result.as_ref().err());

        if result.is_ok() {
            debug!("Received framed response after {:?}", pending.elapsed());
            if !buffer.is_empty() {
                warn!("Discarding {} byte(s) trailing the response", buffer.len());
            }
        }

        result
    }

    /// Same as [`send_and_await_response`](Self::send_and_await_response)
    /// using the configured default timeout.
    pub async fn request(&mut self, payload: &[u8]) -> Result<Bytes> {
        let timeout = self.config.default_timeout;
        self.send_and_await_response(payload, timeout).await
    }

    /// A request future dropped mid-flight leaves the state behind; its
    /// reply may still turn up, so the next request drains first.
    fn recover_abandoned(&mut self) {
        if !self.state.is_idle() {
            warn!("Previous request abandoned while {:?}", self.state);
            self.state = TransportState::Idle;
            self.needs_drain = true;
        }
    }

    async fn begin_request(&mut self, payload: &[u8]) -> Result<()> {
        self.recover_abandoned();

        if !self.session.is_open() {
            return Err(Error::NotConnected);
        }

        if self.config.drain_before_request || self.needs_drain {
            self.drain().await?;
        }

        self.write_payload(payload).await?;
        self.state = TransportState::AwaitingResponse;
        Ok(())
    }

    fn finish_request(&mut self, pending: &PendingRequest<'_>, err: Option<&Error>) {
        self.state = TransportState::Idle;

        if let Some(Error::Timeout(_)) = err {
            warn!(
                "No response to {} byte request within {:?}",
                pending.payload.len(),
                pending.timeout
            );
            self.needs_drain = true;
        }
    }

    async fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        let channel = self.session.channel_mut()?;
        self.state = TransportState::Sending;

        debug!("Writing {} byte payload", payload.len());
        if log_enabled!(Level::Trace) {
            trace!("Payload: {:02x?}", payload);
        }

        let written = match channel.write_all(payload).await {
            Ok(()) => channel.flush().await,
            Err(e) => Err(e),
        };

        written.map_err(|e| self.fail(e))
    }

    /// One read into `buf`, bounded by the request deadline.
    ///
    /// Returns a non-zero byte count; end of stream and disconnect
    /// notifications are channel failures.
    async fn read_before(
        &mut self,
        pending: &PendingRequest<'_>,
        buf: &mut [u8],
    ) -> Result<usize> {
        let mut disconnected = self.session.subscribe();
        let channel = self.session.channel_mut()?;

        let wait = async {
            tokio::select! {
                read = channel.read(buf) => WaitOutcome::Read(read),
                _ = wait_disconnected(&mut disconnected) => WaitOutcome::Disconnected,
            }
        };

        match timeout_at(pending.deadline(), wait).await {
            Ok(WaitOutcome::Read(Ok(0))) => Err(self.fail(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "device closed the channel",
            ))),
            Ok(WaitOutcome::Read(Ok(n))) => Ok(n),
            Ok(WaitOutcome::Read(Err(e))) => Err(self.fail(e)),
            Ok(WaitOutcome::Disconnected) => Err(self.fail(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "device disconnected",
            ))),
            Err(_) => Err(Error::Timeout(pending.timeout)),
        }
    }

    /// Discards input already queued on the channel so a late reply to an
    /// earlier request is not taken for the answer to the next one.
    async fn drain(&mut self) -> Result<()> {
        let mut discard = BytesMut::zeroed(self.config.max_response_len);
        let drain_timeout = self.config.drain_timeout;

        for _ in 0..self.config.max_drain_reads {
            let channel = self.session.channel_mut()?;
            match timeout(drain_timeout, channel.read(&mut discard[..])).await {
                Ok(Ok(0)) => {
                    return Err(self.fail(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "device closed the channel",
                    )))
                }
                Ok(Ok(n)) => warn!("Discarding {} stale byte(s)", n),
                Ok(Err(e)) => return Err(self.fail(e)),
                Err(_) => {
                    self.needs_drain = false;
                    return Ok(());
                }
            }
        }

        warn!(
            "Channel still busy after {} drain reads",
            self.config.max_drain_reads
        );
        Ok(())
    }

    fn fail(&mut self, err: std::io::Error) -> Error {
        error!("Device channel failure: {}", err);
        self.session.mark_failed();
        self.state = TransportState::Idle;
        Error::channel(err)
    }
}

async fn wait_disconnected(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Shared access to one transport from several tasks.
///
/// A request issued while another is still in flight is rejected with
/// [`Error::Busy`] instead of being queued.
pub struct TransportHandle<T> {
    inner: Arc<Mutex<CommandTransport<T>>>,
}

impl<T> Clone for TransportHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> TransportHandle<T> {
    pub fn new(transport: CommandTransport<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(transport)),
        }
    }

    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        let mut transport = self.inner.try_lock().map_err(|_| Error::Busy)?;
        transport.send(payload).await
    }

    pub async fn send_and_await_response(
        &self,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Bytes> {
        let mut transport = self.inner.try_lock().map_err(|_| Error::Busy)?;
        transport.send_and_await_response(payload, timeout).await
    }

    /// Waits for exclusive access, e.g. to reopen the session.
    pub async fn lock(&self) -> MutexGuard<'_, CommandTransport<T>> {
        self.inner.lock().await
    }
}
