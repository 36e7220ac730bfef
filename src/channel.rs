//! Opening device channels from a URI.
//!
//! Supported schemes:
//! - `serial:///dev/ttyACM0` or `serial://COM3`, with an optional
//!   `?baud=921600` override
//! - `tcp://192.168.1.100:5000`

use std::str::FromStr;

use log::{debug, info};
use serialport::{ClearBuffer, SerialPort};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};

/// Any byte stream a transport can run over.
pub trait ByteChannel: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteChannel for T {}

pub type BoxedChannel = Box<dyn ByteChannel>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelUri {
    Serial { path: String, baud_rate: Option<u32> },
    Tcp { addr: String },
}

impl FromStr for ChannelUri {
    type Err = Error;

    fn from_str(uri: &str) -> Result<Self> {
        if let Some(rest) = uri.strip_prefix("serial://") {
            let (path, query) = match rest.split_once('?') {
                Some((path, query)) => (path, Some(query)),
                None => (rest, None),
            };
            if path.is_empty() {
                return Err(Error::InvalidUri(uri.to_string()));
            }

            let baud_rate = match query {
                Some(query) => Some(parse_baud(uri, query)?),
                None => None,
            };

            return Ok(ChannelUri::Serial {
                path: path.to_string(),
                baud_rate,
            });
        }

        if let Some(addr) = uri.strip_prefix("tcp://") {
            if addr.is_empty() || !addr.contains(':') {
                return Err(Error::InvalidUri(uri.to_string()));
            }
            return Ok(ChannelUri::Tcp {
                addr: addr.to_string(),
            });
        }

        Err(Error::InvalidUri(uri.to_string()))
    }
}

fn parse_baud(uri: &str, query: &str) -> Result<u32> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("baud="))
        .and_then(|value| value.parse().ok())
        .filter(|baud| *baud > 0)
        .ok_or_else(|| Error::InvalidUri(uri.to_string()))
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub uri: String,
    pub baud_rate: u32,
    pub tcp_keepalive: bool,
    pub tcp_nodelay: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            baud_rate: 115200,
            tcp_keepalive: true,
            tcp_nodelay: true,
        }
    }
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn without_keepalive(mut self) -> Self {
        self.tcp_keepalive = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.uri.is_empty() {
            return Err(Error::Configuration("URI must be specified".into()));
        }

        if self.baud_rate == 0 {
            return Err(Error::Configuration("baud rate must be non-zero".into()));
        }

        Ok(())
    }
}

/// Opens the channel named by `config.uri`.
pub async fn open(config: &ChannelConfig) -> Result<BoxedChannel> {
    config.validate()?;

    match config.uri.parse()? {
        ChannelUri::Serial { path, baud_rate } => {
            let baud_rate = baud_rate.unwrap_or(config.baud_rate);
            info!("Opening serial channel {} at {} baud", path, baud_rate);

            let builder = tokio_serial::new(path.as_str(), baud_rate);
            let stream = tokio_serial::SerialStream::open(&builder)?;
            // Bytes left over from a previous session must not pose as replies.
            stream.clear(ClearBuffer::All)?;
            Ok(Box::new(stream))
        }
        ChannelUri::Tcp { addr } => {
            info!("Opening TCP channel {}", addr);

            let stream = tokio::net::TcpStream::connect(addr.as_str()).await?;
            stream.set_nodelay(config.tcp_nodelay)?;
            if config.tcp_keepalive {
                socket2::SockRef::from(&stream).set_keepalive(true)?;
                debug!("TCP keepalive enabled");
            }
            Ok(Box::new(stream))
        }
    }
}
