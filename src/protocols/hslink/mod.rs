//! HSLink debug probe command channel.
//!
//! Commands are JSON-ish strings chosen by the caller; this layer only
//! adds the HID report framing and turns replies back into strings.

use std::time::Duration;

use bytes::BytesMut;
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Encoder;

use crate::error::Result;
use crate::transport::CommandTransport;

mod types;

pub use self::types::{ReportCodec, DOWN_REPORT_ID, HSLINK_PID, HSLINK_VID, UP_REPORT_ID};

pub struct HsLinkProbe<T> {
    transport: CommandTransport<T>,
    codec: ReportCodec,
    tx_buffer: BytesMut,
}

impl<T: AsyncRead + AsyncWrite + Unpin> HsLinkProbe<T> {
    pub fn new(transport: CommandTransport<T>) -> Self {
        Self {
            transport,
            codec: ReportCodec,
            tx_buffer: BytesMut::new(),
        }
    }

    pub fn transport(&self) -> &CommandTransport<T> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut CommandTransport<T> {
        &mut self.transport
    }

    pub fn into_inner(self) -> CommandTransport<T> {
        self.transport
    }

    /// Sends a command without waiting for the probe to answer.
    pub async fn write(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        self.frame(data.as_ref())?;
        self.transport.send(&self.tx_buffer).await
    }

    /// Sends a command and returns the probe's textual reply.
    ///
    /// A reply split across several reads is reassembled; one that is not
    /// terminated within the transport's response buffer is rejected.
    pub async fn write_wait_rsp(
        &mut self,
        data: impl AsRef<[u8]>,
        timeout: Duration,
    ) -> Result<String> {
        self.frame(data.as_ref())?;
        let reply = self
            .transport
            .send_and_await_frame(&self.tx_buffer, timeout, &mut self.codec)
            .await?;
        debug!("Probe replied: {}", reply);
        Ok(reply)
    }

    fn frame(&mut self, data: &[u8]) -> Result<()> {
        self.tx_buffer.clear();
        self.codec.encode(data, &mut self.tx_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::session::DeviceSession;
    use crate::transport::TransportConfig;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test(start_paused = true)]
    async fn write_adds_report_id() {
        let (host, mut device) = duplex(1024);
        let mut probe = HsLinkProbe::new(CommandTransport::with_channel(host));

        probe.write("{\"name\":\"entry_hslink_bl\"}").await.unwrap();

        let mut buf = vec![0u8; 27];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], DOWN_REPORT_ID);
        assert_eq!(&buf[1..], b"{\"name\":\"entry_hslink_bl\"}");
    }

    #[tokio::test(start_paused = true)]
    async fn write_wait_rsp_decodes_reply() {
        let (host, mut device) = duplex(1024);
        let mut probe = HsLinkProbe::new(CommandTransport::with_channel(host));

        let responder = tokio::spawn(async move {
            let mut buf = vec![0u8; 7];
            device.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"\x01Hello?");

            let mut report = vec![UP_REPORT_ID];
            report.extend_from_slice(b"{\"serial\":\"HS-0001\"}");
            report.resize(64, 0);
            device.write_all(&report).await.unwrap();
            device
        });

        let reply = probe
            .write_wait_rsp("Hello?", Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(reply, "{\"serial\":\"HS-0001\"}");
        responder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_report_id_is_rejected() {
        let (host, mut device) = duplex(1024);
        let mut probe = HsLinkProbe::new(CommandTransport::with_channel(host));

        let responder = tokio::spawn(async move {
            let mut buf = vec![0u8; 3];
            device.read_exact(&mut buf).await.unwrap();
            device.write_all(b"\x05??").await.unwrap();
            device
        });

        let err = probe
            .write_wait_rsp("hi", Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedReportId(0x05)));
        assert!(probe.transport().is_open());
        responder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_probe_times_out() {
        let (host, _device) = duplex(1024);
        let mut probe = HsLinkProbe::new(CommandTransport::with_channel(host));

        let err = probe
            .write_wait_rsp("hi", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn reply_split_across_writes_is_reassembled() {
        let (host, mut device) = duplex(1024);
        let mut probe = HsLinkProbe::new(CommandTransport::with_channel(host));

        let responder = tokio::spawn(async move {
            let mut buf = vec![0u8; 3];
            device.read_exact(&mut buf).await.unwrap();
            device.write_all(b"\x02{\"status\":\"su").await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            device.write_all(b"ccess\"}\x00").await.unwrap();
            device
        });

        let reply = probe
            .write_wait_rsp("hi", Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(reply, "{\"status\":\"success\"}");
        responder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unterminated_reply_is_not_truncated() {
        let (host, mut device) = duplex(1024);
        let mut probe = HsLinkProbe::new(CommandTransport::with_channel(host));

        let responder = tokio::spawn(async move {
            let mut buf = vec![0u8; 3];
            device.read_exact(&mut buf).await.unwrap();
            device.write_all(b"\x02{\"status\":\"su").await.unwrap();
            device
        });

        let err = probe
            .write_wait_rsp("hi", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        responder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_reply_is_invalid() {
        let (host, mut device) = duplex(1024);
        let config = TransportConfig::new().with_max_response_len(8);
        let transport = CommandTransport::new(DeviceSession::open_with(host), config).unwrap();
        let mut probe = HsLinkProbe::new(transport);

        let responder = tokio::spawn(async move {
            let mut buf = vec![0u8; 3];
            device.read_exact(&mut buf).await.unwrap();
            device.write_all(b"\x020123456789\x00").await.unwrap();
            device
        });

        let err = probe
            .write_wait_rsp("hi", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
        assert!(probe.transport().is_open());
        responder.await.unwrap();
    }
}
