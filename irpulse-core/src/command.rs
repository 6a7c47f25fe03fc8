//! The aggregate: a named collection of IR commands bound to one
//! emitter/receiver channel pair.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::capture::{CancelToken, CaptureConfig, CaptureError, SignalCapture};
use crate::codec;
pub use crate::codec::DecodeError;
use crate::emit::{EmitConfig, EmitError, SignalEmitter};
use crate::pulse::PulseTrain;
use crate::quantize::quantize;
use crate::transport::Transport;

#[derive(Debug, Error)]
pub enum AddError {
    #[error("capture failed")]
    Capture(#[source] CaptureError),
    #[error("receiver channel is busy")]
    ChannelBusy,
}

impl From<CaptureError> for AddError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::ChannelBusy => AddError::ChannelBusy,
            other => AddError::Capture(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum RemoveError {
    #[error("no command named `{0}`")]
    UnknownCommand(String),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not read command set file")]
    Io(#[from] io::Error),
    #[error("could not decode command set file")]
    Decode(#[from] DecodeError),
}

/// A set of IR commands, e.g. all the buttons of one remote control.
///
/// The emitter and receiver channels denote physical wiring and are
/// fixed at construction. Commands are mutated only through
/// [`add`](Self::add) / [`insert`](Self::insert) /
/// [`remove`](Self::remove); the map itself is never handed out.
#[derive(Debug)]
pub struct CommandSet {
    name: Option<String>,
    emitter_gpio: u32,
    receiver_gpio: u32,
    description: String,
    commands: BTreeMap<String, PulseTrain>,
    capture: SignalCapture,
    emitter: SignalEmitter,
}

impl CommandSet {
    pub fn new(emitter_gpio: u32, receiver_gpio: u32) -> Self {
        CommandSet {
            name: None,
            emitter_gpio,
            receiver_gpio,
            description: String::new(),
            commands: BTreeMap::new(),
            capture: SignalCapture::default(),
            emitter: SignalEmitter::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capture_config(mut self, config: CaptureConfig) -> Self {
        self.capture = SignalCapture::new(config);
        self
    }

    pub fn with_emit_config(mut self, config: EmitConfig) -> Self {
        self.emitter = SignalEmitter::new(config);
        self
    }

    pub(crate) fn from_parts(
        name: Option<String>,
        emitter_gpio: u32,
        receiver_gpio: u32,
        description: String,
        commands: BTreeMap<String, PulseTrain>,
    ) -> Self {
        CommandSet {
            name,
            emitter_gpio,
            receiver_gpio,
            description,
            commands,
            capture: SignalCapture::default(),
            emitter: SignalEmitter::default(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn emitter_gpio(&self) -> u32 {
        self.emitter_gpio
    }

    pub fn receiver_gpio(&self) -> u32 {
        self.receiver_gpio
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&PulseTrain> {
        self.commands.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PulseTrain)> {
        self.commands.iter().map(|(name, train)| (name.as_str(), train))
    }

    /// Capture one signal from the receiver channel and store it under
    /// `name`, overwriting any previous entry. The captured train is
    /// quantized before storage. On failure the set is unchanged; the
    /// caller decides whether to retry.
    pub fn add(&mut self, transport: &dyn Transport, name: &str) -> Result<(), AddError> {
        self.add_cancellable(transport, name, &CancelToken::new())
    }

    /// Like [`add`](Self::add), with a token to abort the wait.
    pub fn add_cancellable(
        &mut self,
        transport: &dyn Transport,
        name: &str,
        cancel: &CancelToken,
    ) -> Result<(), AddError> {
        let raw = self
            .capture
            .capture_cancellable(transport, self.receiver_gpio, cancel)?;
        let train = quantize(&raw, self.capture.config().class_tolerance);
        log::info!("stored command `{}` ({} pulses)", name, train.len());
        self.commands.insert(name.to_owned(), train);
        Ok(())
    }

    /// Store an already-built train under `name`.
    pub fn insert(&mut self, name: impl Into<String>, train: PulseTrain) {
        self.commands.insert(name.into(), train);
    }

    /// Replay the named command on the emitter channel.
    pub fn emit(&self, transport: &dyn Transport, name: &str) -> Result<(), EmitError> {
        let train = self
            .commands
            .get(name)
            .ok_or_else(|| EmitError::UnknownCommand(name.to_owned()))?;
        self.emitter.emit(transport, self.emitter_gpio, train)
    }

    pub fn remove(&mut self, name: &str) -> Result<PulseTrain, RemoveError> {
        self.commands
            .remove(name)
            .ok_or_else(|| RemoveError::UnknownCommand(name.to_owned()))
    }

    pub fn save_as(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let text = codec::encode(self)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(path, text)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<CommandSet, LoadError> {
        let text = fs::read_to_string(path)?;
        Ok(codec::decode(&text)?)
    }
}

/// Structural equality: channels, labels and the command mapping.
/// Capture/emit configuration is runtime tuning, not identity.
impl PartialEq for CommandSet {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.emitter_gpio == other.emitter_gpio
            && self.receiver_gpio == other.receiver_gpio
            && self.description == other.description
            && self.commands == other.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use std::time::Duration;

    fn test_set() -> CommandSet {
        CommandSet::new(17, 4).with_capture_config(CaptureConfig {
            min_pulses: 2,
            ..CaptureConfig::default()
        })
    }

    fn no_gap() -> EmitConfig {
        EmitConfig { emit_gap: Duration::from_millis(0), ..EmitConfig::default() }
    }

    #[test]
    fn add_captures_quantizes_and_stores() {
        let transport = MemoryTransport::new();
        transport.push_script(MemoryTransport::edges_from_durations(&[
            548, 4500, 560, 1690, 572, 4510,
        ]));

        let mut set = test_set();
        set.add(&transport, "volume_up").unwrap();

        assert_eq!(
            set.get("volume_up"),
            Some(&PulseTrain::from_durations(&[560, 4505, 560, 1690, 560, 4505]).unwrap())
        );
    }

    #[test]
    fn failed_add_leaves_the_set_unchanged() {
        let transport = MemoryTransport::new();
        let mut set = test_set();
        set.insert("keep", PulseTrain::from_durations(&[500, 500, 500]).unwrap());

        // No script queued: the capture sees no edges at all.
        let err = set.add(&transport, "new").unwrap_err();
        assert!(matches!(err, AddError::Capture(CaptureError::NoSignal)));
        assert_eq!(set.len(), 1);
        assert!(set.contains("keep"));
    }

    #[test]
    fn busy_receiver_fails_fast() {
        let transport = MemoryTransport::new();
        let _held = transport.subscribe(4).unwrap();

        let mut set = test_set();
        let err = set.add(&transport, "x").unwrap_err();
        assert!(matches!(err, AddError::ChannelBusy));
    }

    #[test]
    fn add_then_remove_restores_the_mapping() {
        let transport = MemoryTransport::new();
        transport.push_script(MemoryTransport::edges_from_durations(&[2000, 1000, 2000]));

        let mut set = test_set();
        set.insert("existing", PulseTrain::from_durations(&[500, 500, 500]).unwrap());
        let before: Vec<String> = set.iter().map(|(n, _)| n.to_owned()).collect();

        set.add(&transport, "transient").unwrap();
        set.remove("transient").unwrap();

        let after: Vec<String> = set.iter().map(|(n, _)| n.to_owned()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn remove_of_missing_command_is_an_error() {
        let mut set = test_set();
        assert!(matches!(
            set.remove("missing"),
            Err(RemoveError::UnknownCommand(name)) if name == "missing"
        ));
    }

    #[test]
    fn emit_of_missing_command_transmits_nothing() {
        let transport = MemoryTransport::new();
        let set = test_set();

        let err = set.emit(&transport, "missing").unwrap_err();
        assert!(matches!(err, EmitError::UnknownCommand(name) if name == "missing"));
        assert!(transport.transmissions().is_empty());
    }

    #[test]
    fn emit_uses_the_configured_emitter_channel() {
        let transport = MemoryTransport::new();
        let mut set = test_set().with_emit_config(no_gap());
        let train = PulseTrain::from_durations(&[9000, 4500, 560]).unwrap();
        set.insert("power", train.clone());

        set.emit(&transport, "power").unwrap();

        let sent = transport.transmissions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, 17);
        assert_eq!(sent[0].train, train);
    }

    #[test]
    fn save_and_load_round_trip() {
        let mut set = test_set().with_name("bedroom").with_description("fan remote");
        set.insert("faster", PulseTrain::from_durations(&[9000, 4500, 560]).unwrap());

        let path = std::env::temp_dir().join(format!(
            "irpulse-set-{}-{}.json",
            std::process::id(),
            line!()
        ));
        set.save_as(&path).unwrap();
        let loaded = CommandSet::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, set);
    }

    #[test]
    fn load_of_a_corrupt_file_yields_no_set() {
        let path = std::env::temp_dir().join(format!(
            "irpulse-corrupt-{}-{}.json",
            std::process::id(),
            line!()
        ));
        std::fs::write(&path, "{ not a command set").unwrap();
        let result = CommandSet::load(&path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(LoadError::Decode(_))));
    }

    #[test]
    fn load_of_a_missing_file_is_an_io_error() {
        let result = CommandSet::load("/nonexistent/irpulse-missing.json");
        assert!(matches!(result, Err(LoadError::Io(_))));
    }
}
