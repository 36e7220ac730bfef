//! Open/close lifecycle of the device channel.
//!
//! A session owns at most one channel. Whoever watches the bus (a hotplug
//! listener, for instance) holds a [`DisconnectHandle`] and reports
//! unplug events through it; the transport turns those into channel
//! failures and the session stays closed until it is opened again.

use std::sync::Arc;

use log::{info, warn};
use tokio::sync::watch;

use crate::error::{Error, Result};

/// Reports that the device behind a session went away.
#[derive(Debug, Clone)]
pub struct DisconnectHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl DisconnectHandle {
    pub fn notify(&self) {
        self.tx.send_replace(true);
    }
}

pub struct DeviceSession<T> {
    channel: Option<T>,
    disconnected: Arc<watch::Sender<bool>>,
}

impl<T> DeviceSession<T> {
    /// Creates a closed session.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            channel: None,
            disconnected: Arc::new(tx),
        }
    }

    /// Creates a session that is already open on `channel`.
    pub fn open_with(channel: T) -> Self {
        let mut session = Self::new();
        session.open(channel);
        session
    }

    /// Installs `channel`, dropping any channel that was open before.
    pub fn open(&mut self, channel: T) {
        if self.channel.replace(channel).is_some() {
            warn!("Replacing an already open device channel");
        }
        self.disconnected.send_replace(false);
        info!("Device session opened");
    }

    /// Closes the session, handing the channel back to the caller.
    pub fn close(&mut self) -> Option<T> {
        let channel = self.channel.take();
        if channel.is_some() {
            info!("Device session closed");
        }
        channel
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some() && !*self.disconnected.borrow()
    }

    pub fn disconnect_handle(&self) -> DisconnectHandle {
        DisconnectHandle {
            tx: Arc::clone(&self.disconnected),
        }
    }

    /// Watches for disconnects; the value turns `true` when the device is gone.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.disconnected.subscribe()
    }

    /// Borrows the open channel.
    ///
    /// A disconnect reported while idle closes the session here.
    pub fn channel_mut(&mut self) -> Result<&mut T> {
        if *self.disconnected.borrow() && self.channel.take().is_some() {
            warn!("Device disconnected, closing session");
        }
        self.channel.as_mut().ok_or(Error::NotConnected)
    }

    /// Drops the channel after an I/O failure and tells watchers.
    pub(crate) fn mark_failed(&mut self) {
        self.channel = None;
        self.disconnected.send_replace(true);
    }
}

impl<T> Default for DeviceSession<T> {
    fn default() -> Self {
        Self::new()
    }
}
