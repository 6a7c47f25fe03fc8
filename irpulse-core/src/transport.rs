//! Narrow interface to the GPIO/waveform service.
//!
//! The codec core only needs three things from the hardware side: edge
//! notifications on a receiver channel, a primitive that plays an
//! ordered mark/space sequence on an emitter channel, and an explicit
//! connection lifecycle. Everything else (carrier synthesis, waveform
//! scheduling) stays behind this trait.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

use crate::pulse::PulseTrain;

/// One receiver-channel transition. The transport timestamps edges
/// with a wrapping 32-bit microsecond tick counter.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub rising: bool,
    pub tick_us: u32,
}

/// Microsecond distance between two wrapping tick readings.
pub fn tick_diff(earlier: u32, later: u32) -> u32 {
    later.wrapping_sub(earlier)
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("channel {0} is already in use")]
    ChannelBusy(u32),
    #[error("transport I/O failed")]
    Io(#[from] io::Error),
}

/// A single delivery from an edge feed.
#[derive(Debug)]
pub enum EdgeEvent {
    /// A receiver transition.
    Edge(Edge),
    /// The transport lost its connection; no further edges follow.
    Lost(TransportError),
}

/// A live edge feed holding an exclusive claim on its receiver
/// channel. Dropping the stream releases the channel.
pub struct EdgeStream {
    rx: Receiver<EdgeEvent>,
    _claim: Box<dyn Any + Send>,
}

impl EdgeStream {
    pub fn new(rx: Receiver<EdgeEvent>, claim: Box<dyn Any + Send>) -> Self {
        EdgeStream { rx, _claim: claim }
    }

    /// Wait up to `timeout` for the next event. `Disconnected` means
    /// the transport closed the feed in an orderly way; a connection
    /// failure arrives as [`EdgeEvent::Lost`] instead.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<EdgeEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// The GPIO/waveform service as seen by the codec core.
pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Start delivering edges seen on `channel`. At most one
    /// subscription per channel at a time; a second one fails with
    /// [`TransportError::ChannelBusy`].
    fn subscribe(&self, channel: u32) -> Result<EdgeStream, TransportError>;

    /// Play `train` on `channel`, driving the mark carrier at
    /// `carrier_khz`. Blocks until the transport acknowledges that the
    /// whole train went out.
    fn transmit(&self, channel: u32, train: &PulseTrain, carrier_khz: f32)
        -> Result<(), TransportError>;
}

/// A transmission recorded by [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transmission {
    pub channel: u32,
    pub carrier_khz: f32,
    pub train: PulseTrain,
}

struct ChannelClaim {
    channel: u32,
    busy: Arc<Mutex<HashSet<u32>>>,
}

impl Drop for ChannelClaim {
    fn drop(&mut self) {
        if let Ok(mut busy) = self.busy.lock() {
            busy.remove(&self.channel);
        }
    }
}

/// In-process transport fed from scripted edge sequences. Stands in
/// for real hardware in tests and lets the capture pipeline run
/// without a device attached.
pub struct MemoryTransport {
    connected: AtomicBool,
    scripts: Mutex<VecDeque<Vec<EdgeEvent>>>,
    busy: Arc<Mutex<HashSet<u32>>>,
    sent: Mutex<Vec<Transmission>>,
    hold_open: AtomicBool,
    live_senders: Mutex<Vec<mpsc::Sender<EdgeEvent>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        MemoryTransport {
            connected: AtomicBool::new(true),
            scripts: Mutex::new(VecDeque::new()),
            busy: Arc::new(Mutex::new(HashSet::new())),
            sent: Mutex::new(Vec::new()),
            hold_open: AtomicBool::new(false),
            live_senders: Mutex::new(Vec::new()),
        }
    }

    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Queue one edge sequence; each `subscribe` call consumes one.
    pub fn push_script(&self, edges: Vec<Edge>) {
        let events = edges.into_iter().map(EdgeEvent::Edge).collect();
        self.scripts.lock().unwrap().push_back(events);
    }

    /// Queue an edge sequence that ends in a connection loss instead
    /// of orderly silence.
    pub fn push_interrupted_script(&self, edges: Vec<Edge>) {
        let mut events: Vec<EdgeEvent> = edges.into_iter().map(EdgeEvent::Edge).collect();
        events.push(EdgeEvent::Lost(TransportError::NotConnected));
        self.scripts.lock().unwrap().push_back(events);
    }

    /// Keep the edge feed open after a script runs dry, so the end of
    /// a signal is detected by quiet timeout instead of stream close.
    pub fn set_hold_open(&self, hold: bool) {
        self.hold_open.store(hold, Ordering::SeqCst);
    }

    pub fn transmissions(&self) -> Vec<Transmission> {
        self.sent.lock().unwrap().clone()
    }

    /// Expand `(mark, space, ...)` durations into the edge sequence a
    /// receiver would report: a rising edge opens each mark, a falling
    /// edge opens each space, and a final space is closed by one last
    /// rising edge before silence.
    pub fn edges_from_durations(durations: &[u32]) -> Vec<Edge> {
        let mut edges = Vec::with_capacity(durations.len() + 1);
        let mut tick: u32 = 0;
        let mut rising = true;
        edges.push(Edge { rising, tick_us: tick });
        for &duration in durations {
            tick = tick.wrapping_add(duration);
            rising = !rising;
            edges.push(Edge { rising, tick_us: tick });
        }
        edges
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        MemoryTransport::new()
    }
}

impl Transport for MemoryTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self, channel: u32) -> Result<EdgeStream, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        {
            let mut busy = self.busy.lock().unwrap();
            if !busy.insert(channel) {
                return Err(TransportError::ChannelBusy(channel));
            }
        }

        let (tx, rx) = mpsc::channel();
        let events = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        for event in events {
            // A send can only fail once the receiver is gone.
            let _ = tx.send(event);
        }
        if self.hold_open.load(Ordering::SeqCst) {
            self.live_senders.lock().unwrap().push(tx);
        }

        let claim = ChannelClaim { channel, busy: Arc::clone(&self.busy) };
        Ok(EdgeStream::new(rx, Box::new(claim)))
    }

    fn transmit(
        &self,
        channel: u32,
        train: &PulseTrain,
        carrier_khz: f32,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().unwrap().push(Transmission {
            channel,
            carrier_khz,
            train: train.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_diff_handles_counter_wrap() {
        assert_eq!(tick_diff(100, 350), 250);
        assert_eq!(tick_diff(u32::MAX - 10, 20), 31);
    }

    #[test]
    fn edges_from_durations_closes_the_last_space() {
        let edges = MemoryTransport::edges_from_durations(&[9000, 4500]);
        assert_eq!(
            edges,
            vec![
                Edge { rising: true, tick_us: 0 },
                Edge { rising: false, tick_us: 9000 },
                Edge { rising: true, tick_us: 13_500 },
            ]
        );
    }

    #[test]
    fn interrupted_script_delivers_edges_then_the_loss() {
        let transport = MemoryTransport::new();
        transport.push_interrupted_script(MemoryTransport::edges_from_durations(&[9000]));
        let stream = transport.subscribe(1).unwrap();

        let wait = Duration::from_millis(10);
        assert!(matches!(stream.recv_timeout(wait), Ok(EdgeEvent::Edge(_))));
        assert!(matches!(stream.recv_timeout(wait), Ok(EdgeEvent::Edge(_))));
        assert!(matches!(stream.recv_timeout(wait), Ok(EdgeEvent::Lost(_))));
        assert!(matches!(
            stream.recv_timeout(wait),
            Err(RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn second_subscription_on_a_channel_is_refused() {
        let transport = MemoryTransport::new();
        let stream = transport.subscribe(7).unwrap();
        match transport.subscribe(7) {
            Err(TransportError::ChannelBusy(7)) => {}
            other => panic!("expected ChannelBusy, got {:?}", other.err()),
        }
        // Releasing the stream frees the channel again.
        drop(stream);
        assert!(transport.subscribe(7).is_ok());
    }

    #[test]
    fn disconnected_transport_refuses_everything() {
        let transport = MemoryTransport::new();
        transport.disconnect();
        assert!(matches!(
            transport.subscribe(1),
            Err(TransportError::NotConnected)
        ));
        let train = crate::pulse::PulseTrain::from_durations(&[500, 500, 500]).unwrap();
        assert!(matches!(
            transport.transmit(1, &train, 38.0),
            Err(TransportError::NotConnected)
        ));
    }
}
