//! HSLink Probe Command Transport
//!
//! This library provides the integrity-checked command path used to talk to
//! an HSLink debug probe and to validate firmware images destined for it.
//!
//! # Features
//! - CRC-32 bit-exact with the STM32/HPM hardware CRC unit
//! - Fire-and-forget and request/response commands over any async byte channel
//! - Bounded waits with distinct timeout and channel-failure errors
//! - Stale reply draining between requests
//! - Serial and TCP channel support
//! - Intel HEX and raw binary firmware images
//!
//! # Layers
//! - Checksum engine (`checksum`)
//! - Command transport and device session (`transport`, `session`)
//! - HSLink report framing (`protocols::hslink`)
//!
//! # Examples
//!
//! ## Checksumming a firmware image
//! ```no_run
//! use hslink_transport::{compute_checksum, FirmwareImage};
//!
//! # fn main() -> hslink_transport::Result<()> {
//! let image = FirmwareImage::load("firmware.hex", hslink_transport::firmware::DEFAULT_MAX_SIZE)?;
//! let crc = compute_checksum(image.data(), image.len(), None);
//! assert!(image.verify(crc));
//! # Ok(())
//! # }
//! ```
//!
//! ## Talking to a probe
//! ```no_run
//! use std::time::Duration;
//! use hslink_transport::{ChannelConfig, HsLinkProbe, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> hslink_transport::Result<()> {
//!     let channel = ChannelConfig::new().with_uri("serial:///dev/ttyACM0");
//!     let transport = hslink_transport::open_transport(&channel, TransportConfig::new()).await?;
//!
//!     let mut probe = HsLinkProbe::new(transport);
//!     let info = probe
//!         .write_wait_rsp("{\"name\":\"Hello\"}", Duration::from_millis(1000))
//!         .await?;
//!     println!("{}", info);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod checksum;
mod error;
pub mod firmware;
pub mod protocols;
pub mod session;
pub mod transport;

pub use channel::{BoxedChannel, ChannelConfig, ChannelUri};
pub use error::{Error, Result};
pub use firmware::FirmwareImage;
pub use protocols::hslink::HsLinkProbe;
pub use session::{DeviceSession, DisconnectHandle};
pub use transport::{CommandTransport, TransportConfig, TransportHandle, TransportState};

/// Computes the hardware CRC over the first `length` bytes of `buffer`.
///
/// `seed` defaults to the CRC unit's reset value `0xFFFFFFFF`.
pub fn compute_checksum(buffer: &[u8], length: usize, seed: Option<u32>) -> u32 {
    checksum::compute(buffer, length, seed.unwrap_or(checksum::DEFAULT_SEED))
}

/// Opens the channel named in `channel` and wraps it in a ready transport.
pub async fn open_transport(
    channel: &ChannelConfig,
    config: TransportConfig,
) -> Result<CommandTransport<BoxedChannel>> {
    let stream = channel::open(channel).await?;
    CommandTransport::new(DeviceSession::open_with(stream), config)
}
