//! Daemon: the hub's inbound event loop.
//!
//! HTTP workers write to the hub directly. Everything arriving from the bus
//! flows through one mpsc channel whose single consumer is this loop, so
//! inbound messages are applied in arrival order.
//!
//! # Main loop tick
//!
//! 1. Wait up to `poll_ms` for the first event
//! 2. Drain the channel, applying each event to the hub
//! 3. Report whether a shutdown was requested

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::bus::InboundMessage;
use crate::error::{Error, Result};
use crate::hub::Hub;


/// Events that can be sent to the daemon's main loop via the channel.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A message received on a subscribed topic.
    Inbound(InboundMessage),
    /// Request the daemon to shut down gracefully.
    Shutdown,
}

impl From<InboundMessage> for DaemonEvent {
    fn from(message: InboundMessage) -> Self {
        DaemonEvent::Inbound(message)
    }
}


/// Configuration for the daemon loop.
pub struct DaemonConfig {
    /// How long one tick waits for the first event (milliseconds).
    pub poll_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig { poll_ms: 200 }
    }
}


/// Cloneable sender side of the daemon channel.
#[derive(Clone)]
pub struct DaemonHandle {
    sender: mpsc::Sender<DaemonEvent>,
}

impl DaemonHandle {
    /// Raw sender, for producers that convert their own messages into events.
    pub fn sender(&self) -> mpsc::Sender<DaemonEvent> {
        self.sender.clone()
    }

    pub fn send_inbound(&self, message: InboundMessage) -> Result<()> {
        self.send(DaemonEvent::Inbound(message))
    }

    /// Request daemon shutdown.
    pub fn shutdown(&self) -> Result<()> {
        self.send(DaemonEvent::Shutdown)
    }

    fn send(&self, event: DaemonEvent) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|e| Error::Transport(format!("daemon channel send failed: {}", e)))
    }
}


/// Create the daemon channel ahead of the daemon, so the bus transport can
/// be connected before the hub that owns it exists.
pub fn channel() -> (DaemonHandle, mpsc::Receiver<DaemonEvent>) {
    let (sender, receiver) = mpsc::channel();
    (DaemonHandle { sender }, receiver)
}


pub struct Daemon {
    hub: Arc<Hub>,
    receiver: mpsc::Receiver<DaemonEvent>,
    handle: DaemonHandle,
    config: DaemonConfig,
    applied: u64,
}

impl Daemon {
    /// Daemon with its own fresh channel.
    pub fn new(hub: Arc<Hub>) -> Daemon {
        let (handle, receiver) = channel();
        Self::with_channel(hub, handle, receiver, DaemonConfig::default())
    }

    /// Daemon consuming a channel created earlier with [`channel`].
    pub fn with_channel(
        hub: Arc<Hub>,
        handle: DaemonHandle,
        receiver: mpsc::Receiver<DaemonEvent>,
        config: DaemonConfig,
    ) -> Daemon {
        Daemon {
            hub,
            receiver,
            handle,
            config,
            applied: 0,
        }
    }

    /// Get a handle for sending events to this daemon.
    pub fn handle(&self) -> DaemonHandle {
        self.handle.clone()
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Number of inbound messages applied so far.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Run the main event loop. Blocks until shutdown is received.
    pub fn run(&mut self) {
        info!("daemon started");
        while !self.tick() {}
        info!("daemon stopped after {} inbound message(s)", self.applied);
    }

    /// Run exactly one tick of the main loop.
    /// Returns true if shutdown was requested.
    pub fn tick(&mut self) -> bool {
        match self
            .receiver
            .recv_timeout(Duration::from_millis(self.config.poll_ms))
        {
            Ok(event) => {
                if self.handle_event(event) {
                    return true;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => return false,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                info!("daemon channel disconnected, shutting down");
                return true;
            }
        }
        self.drain_channel()
    }

    /// Drain all pending events from the channel.
    /// Returns true if a Shutdown event was received.
    fn drain_channel(&mut self) -> bool {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.handle_event(event) {
                        return true;
                    }
                }
                Err(mpsc::TryRecvError::Empty) => return false,
                Err(mpsc::TryRecvError::Disconnected) => {
                    info!("daemon channel disconnected, shutting down");
                    return true;
                }
            }
        }
    }

    fn handle_event(&mut self, event: DaemonEvent) -> bool {
        match event {
            DaemonEvent::Inbound(message) => {
                let written = self.hub.apply_inbound(&message);
                debug!("inbound {} applied to {} path(s)", message.topic, written);
                self.applied += 1;
                false
            }
            DaemonEvent::Shutdown => true,
        }
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
