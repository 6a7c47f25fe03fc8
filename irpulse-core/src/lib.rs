//! Capture, quantize and replay infrared remote-control signals.
//!
//! The core pipeline turns raw edge timings from a receiver into a
//! [`PulseTrain`] (an alternating mark/space duration sequence),
//! stores named trains in a [`CommandSet`], and replays them through
//! any [`Transport`] implementation. No protocol knowledge is baked
//! in: NEC, RC5 and raw proprietary remotes all round-trip the same
//! way.
//!
//! ```no_run
//! use irpulse_core::{CommandSet, MemoryTransport};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = MemoryTransport::new();
//! let mut tv = CommandSet::new(17, 4).with_name("tv");
//! tv.add(&transport, "volume_up")?;
//! tv.emit(&transport, "volume_up")?;
//! tv.save_as("tv.json")?;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod codec;
pub mod command;
pub mod emit;
pub mod pulse;
pub mod quantize;
#[cfg(feature = "serial")]
pub mod serial;
pub mod transport;

pub use capture::{CancelToken, CaptureConfig, CaptureError, SignalCapture};
pub use codec::DecodeError;
pub use command::{AddError, CommandSet, LoadError, RemoveError};
pub use emit::{EmitConfig, EmitError, SignalEmitter};
pub use pulse::{Level, Pulse, PulseTrain, TrainError, MAX_PULSE_COUNT, MAX_PULSE_US, MIN_PULSE_US};
pub use transport::{
    Edge, EdgeEvent, EdgeStream, MemoryTransport, Transmission, Transport, TransportError,
};
