//! Transport contract between the bridge and a broker client.
//!
//! `publish` only enqueues; the returned [`Delivery`] is waited on separately
//! so that every publish for one write can be in flight at once.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use super::mapping::QoS;


/// A message received from the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}


/// Completion handle for one enqueued publish.
#[derive(Debug)]
pub struct Delivery {
    state: DeliveryState,
}

#[derive(Debug)]
enum DeliveryState {
    Done(std::result::Result<(), String>),
    Pending(mpsc::Receiver<std::result::Result<(), String>>),
}

impl Delivery {
    /// Already delivered (or nothing to wait for).
    pub fn completed() -> Self {
        Delivery { state: DeliveryState::Done(Ok(())) }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Delivery { state: DeliveryState::Done(Err(reason.into())) }
    }

    /// Completion arrives on `rx`; a dropped sender counts as failure.
    pub fn pending(rx: mpsc::Receiver<std::result::Result<(), String>>) -> Self {
        Delivery { state: DeliveryState::Pending(rx) }
    }

    /// Block until the broker acknowledges or `deadline` passes.
    pub fn wait_until(self, deadline: Instant) -> Result<()> {
        match self.state {
            DeliveryState::Done(r) => r.map_err(Error::Transport),
            DeliveryState::Pending(rx) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(timeout) {
                    Ok(r) => r.map_err(Error::Transport),
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        Err(Error::Transport("timed out waiting for broker acknowledgement".into()))
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        Err(Error::Transport("connection dropped before acknowledgement".into()))
                    }
                }
            }
        }
    }

    pub fn wait(self, timeout: Duration) -> Result<()> {
        self.wait_until(Instant::now() + timeout)
    }
}


/// A broker client as seen by the bridge.
pub trait Transport: Send + Sync {
    /// Enqueue a publish. Errors here mean the message was never queued.
    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<Delivery>;

    /// Register a subscription; re-established by the transport after reconnects.
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<()>;
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_and_failed() {
        assert!(Delivery::completed().wait(Duration::from_millis(1)).is_ok());
        let err = Delivery::failed("nope").wait(Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, Error::Transport(ref m) if m == "nope"));
    }

    #[test]
    fn pending_resolves_on_ack() {
        let (tx, rx) = mpsc::channel();
        let d = Delivery::pending(rx);
        tx.send(Ok(())).unwrap();
        assert!(d.wait(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn pending_times_out() {
        let (_tx, rx) = mpsc::channel();
        let err = Delivery::pending(rx).wait(Duration::from_millis(10)).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn dropped_sender_fails() {
        let (tx, rx) = mpsc::channel::<std::result::Result<(), String>>();
        drop(tx);
        let err = Delivery::pending(rx).wait(Duration::from_secs(1)).unwrap_err();
        assert!(err.to_string().contains("dropped"));
    }
}
