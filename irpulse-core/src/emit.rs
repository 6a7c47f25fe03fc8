//! Replay a stored pulse train on an emitter channel.

use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::pulse::{PulseTrain, TrainError};
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone)]
pub struct EmitConfig {
    /// Carrier frequency driven during marks, in kHz.
    pub carrier_khz: f32,
    /// Settle delay after each transmission.
    pub emit_gap: Duration,
}

impl Default for EmitConfig {
    fn default() -> Self {
        EmitConfig {
            carrier_khz: 38.0,
            emit_gap: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("no command named `{0}`")]
    UnknownCommand(String),
    #[error("transport unavailable")]
    TransportUnavailable(#[source] TransportError),
    #[error("pulse train failed validation before transmit")]
    InvalidTrain(#[source] TrainError),
}

impl From<TransportError> for EmitError {
    fn from(err: TransportError) -> Self {
        EmitError::TransportUnavailable(err)
    }
}

/// Stateless replay service; holds only its configuration.
#[derive(Debug, Clone, Default)]
pub struct SignalEmitter {
    config: EmitConfig,
}

impl SignalEmitter {
    pub fn new(config: EmitConfig) -> Self {
        SignalEmitter { config }
    }

    pub fn config(&self) -> &EmitConfig {
        &self.config
    }

    /// Transmit `train` on `channel`, preserving order and exact
    /// durations. Blocks until the transport acknowledges completion,
    /// then waits out the configured emit gap.
    pub fn emit(
        &self,
        transport: &dyn Transport,
        channel: u32,
        train: &PulseTrain,
    ) -> Result<(), EmitError> {
        if !transport.is_connected() {
            return Err(EmitError::TransportUnavailable(TransportError::NotConnected));
        }
        // Unreachable for trains built by this crate; guards callers
        // that assembled one by hand.
        train.validate().map_err(EmitError::InvalidTrain)?;

        log::info!(
            "emitting {} pulses on channel {} at {} kHz",
            train.len(),
            channel,
            self.config.carrier_khz
        );
        transport.transmit(channel, train, self.config.carrier_khz)?;
        thread::sleep(self.config.emit_gap);
        Ok(())
    }
}
