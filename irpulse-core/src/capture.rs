//! Signal capture: reduce a bounded window of receiver-channel
//! activity to one [`PulseTrain`].
//!
//! The transport delivers edges asynchronously; `capture` presents a
//! blocking contract to its caller by waiting on the edge stream with
//! timeouts. Idle waits for the first rising edge (bounded by
//! `acquire_timeout`), each further edge closes one timed interval,
//! and a quiet gap longer than `inter_pulse_timeout` ends the signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::pulse::{Level, Pulse, PulseTrain, MAX_PULSE_COUNT, MAX_PULSE_US, MIN_PULSE_US};
use crate::transport::{tick_diff, Edge, EdgeEvent, Transport, TransportError};

/// How often a waiting capture rechecks its cancel token.
const CANCEL_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Overall window to wait for the first edge.
    pub acquire_timeout: Duration,
    /// Quiet gap that marks the end of a transmission.
    pub inter_pulse_timeout: Duration,
    /// Pulses shorter than this many microseconds are glitches and get
    /// merged into their predecessor.
    pub glitch_us: u32,
    /// Pulses longer than this are clamped.
    pub max_pulse_us: u32,
    /// Edge count bound; a signal still active past it fails with
    /// [`CaptureError::TooLong`].
    pub max_pulses: usize,
    /// Normalized trains shorter than this count as noise.
    pub min_pulses: usize,
    /// Relative tolerance for duration-class quantization.
    pub class_tolerance: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            acquire_timeout: Duration::from_secs(10),
            inter_pulse_timeout: Duration::from_millis(15),
            glitch_us: 100,
            max_pulse_us: MAX_PULSE_US,
            max_pulses: MAX_PULSE_COUNT,
            min_pulses: 10,
            class_tolerance: 0.1,
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// Nothing usable arrived within the acquire window.
    #[error("no IR signal detected within the acquire window")]
    NoSignal,
    /// The signal was still active past the pulse-count bound.
    #[error("signal exceeded the pulse-count bound before going quiet")]
    TooLong,
    /// Another capture already holds the receiver channel.
    #[error("receiver channel is busy")]
    ChannelBusy,
    /// Transport connection missing or lost mid-capture.
    #[error("transport unavailable")]
    TransportUnavailable(#[source] TransportError),
    /// The caller cancelled the wait.
    #[error("capture cancelled")]
    Cancelled,
}

impl From<TransportError> for CaptureError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ChannelBusy(_) => CaptureError::ChannelBusy,
            other => CaptureError::TransportUnavailable(other),
        }
    }
}

/// Shared flag a caller can set to abort a capture in progress.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Stateless capture service; holds only its configuration.
#[derive(Debug, Clone, Default)]
pub struct SignalCapture {
    config: CaptureConfig,
}

impl SignalCapture {
    pub fn new(config: CaptureConfig) -> Self {
        SignalCapture { config }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Observe one bounded window of receiver activity and reduce it
    /// to a pulse train. Blocks until the signal ends, a timeout
    /// fires, or the capture fails.
    pub fn capture(
        &self,
        transport: &dyn Transport,
        channel: u32,
    ) -> Result<PulseTrain, CaptureError> {
        self.capture_cancellable(transport, channel, &CancelToken::new())
    }

    /// Like [`capture`](Self::capture), but aborts with
    /// [`CaptureError::Cancelled`] once `cancel` fires.
    pub fn capture_cancellable(
        &self,
        transport: &dyn Transport,
        channel: u32,
        cancel: &CancelToken,
    ) -> Result<PulseTrain, CaptureError> {
        let stream = transport.subscribe(channel)?;
        log::info!("capturing on channel {}", channel);

        // Idle: wait for the rising edge that opens the first mark.
        let deadline = Instant::now() + self.config.acquire_timeout;
        let mut last: Edge = loop {
            if cancel.is_cancelled() {
                return Err(CaptureError::Cancelled);
            }
            let left = match deadline.checked_duration_since(Instant::now()) {
                Some(left) => left,
                None => return Err(CaptureError::NoSignal),
            };
            match stream.recv_timeout(left.min(CANCEL_POLL)) {
                Ok(EdgeEvent::Edge(edge)) if edge.rising => break edge,
                // A falling edge with no mark open is leftover noise.
                Ok(EdgeEvent::Edge(_)) => continue,
                Ok(EdgeEvent::Lost(err)) => {
                    return Err(CaptureError::TransportUnavailable(err))
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(CaptureError::NoSignal),
            }
        };

        // Active: every edge closes the interval opened by the one
        // before it. Quiet gap or end of feed finishes the signal.
        let mut raw: Vec<Pulse> = Vec::new();
        loop {
            if cancel.is_cancelled() {
                return Err(CaptureError::Cancelled);
            }
            match stream.recv_timeout(self.config.inter_pulse_timeout) {
                Ok(EdgeEvent::Lost(err)) => {
                    return Err(CaptureError::TransportUnavailable(err))
                }
                Ok(EdgeEvent::Edge(edge)) => {
                    if edge.rising == last.rising {
                        // Duplicate notification; no transition.
                        continue;
                    }
                    let level = if last.rising { Level::Mark } else { Level::Space };
                    raw.push(Pulse {
                        level,
                        duration_us: tick_diff(last.tick_us, edge.tick_us),
                    });
                    last = edge;
                    if raw.len() > self.config.max_pulses {
                        return Err(CaptureError::TooLong);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        drop(stream);

        log::debug!("captured {} raw intervals on channel {}", raw.len(), channel);
        self.normalize(raw)
    }

    /// Noise-filter a raw interval list into a valid train: merge
    /// glitches into their predecessor, drop leading noise, clamp
    /// overlong intervals, and bound the length.
    fn normalize(&self, raw: Vec<Pulse>) -> Result<PulseTrain, CaptureError> {
        let glitch_us = self.config.glitch_us.max(MIN_PULSE_US);
        let max_pulse_us = self.config.max_pulse_us.min(MAX_PULSE_US);

        let mut pulses: Vec<Pulse> = Vec::with_capacity(raw.len());
        for pulse in raw {
            match pulses.last_mut() {
                // Same level as the previous interval: extend it. This
                // is the tail end of a glitch merge.
                Some(last) if last.level == pulse.level => {
                    last.duration_us = last.duration_us.saturating_add(pulse.duration_us);
                }
                // Glitch: absorb into the previous interval.
                Some(last) if pulse.duration_us < glitch_us => {
                    last.duration_us = last.duration_us.saturating_add(pulse.duration_us);
                }
                Some(_) => pulses.push(pulse),
                // Still looking for the first real mark.
                None => {
                    if pulse.level == Level::Mark && pulse.duration_us >= glitch_us {
                        pulses.push(pulse);
                    }
                }
            }
        }

        for pulse in &mut pulses {
            if pulse.duration_us > max_pulse_us {
                pulse.duration_us = max_pulse_us;
            }
        }
        pulses.truncate(self.config.max_pulses.min(MAX_PULSE_COUNT));

        if pulses.len() < self.config.min_pulses.max(1) {
            log::debug!(
                "normalized capture too short ({} pulses), treating as noise",
                pulses.len()
            );
            return Err(CaptureError::NoSignal);
        }
        Ok(PulseTrain::from_normalized(pulses))
    }
}
