//! Render pulse trains to VCD waveform files and read them back.
//!
//! The waveform is a single wire `top.ir`, high during marks, with a
//! one-microsecond timescale. Handy for eyeballing captures in a wave
//! viewer and for importing captures made by other tools.

use std::convert::TryFrom;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use anyhow::{bail, Context};
use vcd::{self, SimulationCommand, TimescaleUnit, Value};

use irpulse_core::{Level, Pulse, PulseTrain};

pub struct VcdWriter<W: Write> {
    vcd: vcd::Writer<W>,
    wire_id: vcd::IdCode,
}

impl<W: Write> VcdWriter<W> {
    pub fn new(writer: W) -> Self {
        let vcd = vcd::Writer::new(writer);
        Self { vcd, wire_id: vcd::IdCode::FIRST }
    }

    pub fn init(&mut self) -> io::Result<()> {
        let writer = &mut self.vcd;

        writer.timescale(1, TimescaleUnit::US)?;
        writer.add_module("top")?;
        let id = writer.add_wire(1, "ir")?;
        self.wire_id = id;
        writer.upscope()?;
        writer.enddefinitions()?;

        writer.begin(SimulationCommand::Dumpvars)?;
        writer.change_scalar(id, Value::V0)?;
        writer.end()?;

        Ok(())
    }

    /// Write one transition per pulse start, plus a closing transition
    /// at the end of the train so the final interval has a length.
    pub fn write_train(&mut self, train: &PulseTrain) -> io::Result<()> {
        let mut ts: u64 = 0;
        let mut value = Value::V0;
        for pulse in train.iter() {
            value = match pulse.level {
                Level::Mark => Value::V1,
                Level::Space => Value::V0,
            };
            self.vcd.timestamp(ts)?;
            self.vcd.change_scalar(self.wire_id, value)?;
            ts += u64::from(pulse.duration_us);
        }
        let closing = if value == Value::V1 { Value::V0 } else { Value::V1 };
        self.vcd.timestamp(ts)?;
        self.vcd.change_scalar(self.wire_id, closing)?;
        Ok(())
    }
}

pub fn write_train_file(path: &Path, train: &PulseTrain) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = VcdWriter::new(file);
    writer.init()?;
    writer.write_train(train)
}

/// Parse a single-wire VCD file back into a pulse train.
pub fn parse_train<R: Read>(reader: R) -> anyhow::Result<PulseTrain> {
    let mut parser = vcd::Parser::new(BufReader::new(reader));

    let header = parser.parse_header()?;
    let wire = header
        .find_var(&["top", "ir"])
        .context("no wire top.ir in vcd file")?
        .code;

    let us_per_unit: u64 = match header.timescale {
        Some((ts, TimescaleUnit::US)) => u64::from(ts),
        Some((ts, TimescaleUnit::MS)) => u64::from(ts) * 1000,
        Some((_, unit)) => bail!("unsupported vcd timescale unit: {:?}", unit),
        None => 1,
    };

    // Collect the de-duplicated transition list of the ir wire.
    let mut current_ts: u64 = 0;
    let mut transitions: Vec<(u64, bool)> = Vec::new();
    for command in &mut parser {
        use vcd::Command::*;
        match command? {
            ChangeScalar(id, value) if id == wire => {
                let high = value == Value::V1;
                if transitions.last().map(|&(_, level)| level) != Some(high) {
                    transitions.push((current_ts * us_per_unit, high));
                }
            }
            Timestamp(ts) => current_ts = ts,
            _ => (),
        }
    }

    // The signal starts at the first rising transition; every interval
    // between transitions becomes one pulse.
    let start = transitions
        .iter()
        .position(|&(_, high)| high)
        .context("vcd file contains no rising edge")?;

    let mut pulses = Vec::new();
    for pair in transitions[start..].windows(2) {
        let (from_ts, high) = pair[0];
        let (to_ts, _) = pair[1];
        let duration = to_ts - from_ts;
        let duration_us = u32::try_from(duration).context("vcd interval too long")?;
        let level = if high { Level::Mark } else { Level::Space };
        pulses.push(Pulse { level, duration_us });
    }

    PulseTrain::new(pulses).context("vcd waveform is not a valid pulse train")
}

pub fn train_from_vcd_file(path: &Path) -> anyhow::Result<PulseTrain> {
    let file = File::open(path)
        .with_context(|| format!("could not open {}", path.display()))?;
    parse_train(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(train: &PulseTrain) -> PulseTrain {
        let mut buf = Vec::new();
        let mut writer = VcdWriter::new(&mut buf);
        writer.init().unwrap();
        writer.write_train(train).unwrap();
        parse_train(Cursor::new(buf)).unwrap()
    }

    #[test]
    fn train_survives_a_vcd_round_trip() {
        let train = PulseTrain::from_durations(&[9000, 4500, 560, 560, 560]).unwrap();
        assert_eq!(round_trip(&train), train);
    }

    #[test]
    fn train_ending_on_a_space_survives_too() {
        let train = PulseTrain::from_durations(&[9000, 4500, 560, 560]).unwrap();
        assert_eq!(round_trip(&train), train);
    }

    #[test]
    fn vcd_without_the_ir_wire_is_rejected() {
        let empty = b"$timescale 1 us $end $scope module top $end $upscope $end $enddefinitions $end";
        assert!(parse_train(Cursor::new(&empty[..])).is_err());
    }
}
