//! Lossless JSON serialization of a [`CommandSet`].
//!
//! The persisted form is a single UTF-8 JSON object: `emitter` and
//! `receiver` channel ids, `description`, optional `name`, and a
//! `commands` mapping from command name to an ordered list of
//! `{level, duration_us}` records. Decoding re-validates every train
//! invariant and is all-or-nothing: one bad entry fails the load.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::CommandSet;
use crate::pulse::{Pulse, PulseTrain, TrainError};

#[derive(Serialize, Deserialize)]
struct SetRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    emitter: u32,
    receiver: u32,
    #[serde(default)]
    description: String,
    commands: BTreeMap<String, Vec<Pulse>>,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed command set record")]
    MalformedRecord(#[from] serde_json::Error),
    #[error("command `{name}` holds an invalid pulse train")]
    InvalidTrain {
        name: String,
        #[source]
        source: TrainError,
    },
}

pub fn encode(set: &CommandSet) -> Result<String, serde_json::Error> {
    let record = SetRecord {
        name: set.name().map(str::to_owned),
        emitter: set.emitter_gpio(),
        receiver: set.receiver_gpio(),
        description: set.description().to_owned(),
        commands: set
            .iter()
            .map(|(name, train)| (name.to_owned(), train.pulses().to_vec()))
            .collect(),
    };
    serde_json::to_string_pretty(&record)
}

pub fn decode(text: &str) -> Result<CommandSet, DecodeError> {
    let record: SetRecord = serde_json::from_str(text)?;

    let mut commands = BTreeMap::new();
    for (name, pulses) in record.commands {
        let train = PulseTrain::new(pulses)
            .map_err(|source| DecodeError::InvalidTrain { name: name.clone(), source })?;
        commands.insert(name, train);
    }

    Ok(CommandSet::from_parts(
        record.name,
        record.emitter,
        record.receiver,
        record.description,
        commands,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandSet;

    fn sample_set() -> CommandSet {
        let mut set = CommandSet::new(17, 4)
            .with_name("living room tv")
            .with_description("Panasonic TX-42");
        set.insert(
            "volume_up",
            PulseTrain::from_durations(&[9000, 4500, 560, 560, 560]).unwrap(),
        );
        set.insert(
            "power",
            PulseTrain::from_durations(&[9000, 4500, 1690, 560]).unwrap(),
        );
        set
    }

    #[test]
    fn round_trip_preserves_the_whole_set() {
        let set = sample_set();
        let decoded = decode(&encode(&set).unwrap()).unwrap();
        assert_eq!(decoded, set);
        assert_eq!(
            decoded.get("volume_up"),
            Some(&PulseTrain::from_durations(&[9000, 4500, 560, 560, 560]).unwrap())
        );
    }

    #[test]
    fn level_spelling_is_lowercase_and_explicit() {
        let json = encode(&sample_set()).unwrap();
        assert!(json.contains("\"level\": \"mark\""));
        assert!(json.contains("\"level\": \"space\""));
    }

    #[test]
    fn non_alternating_entry_fails_the_whole_load() {
        let json = r#"{
            "emitter": 17,
            "receiver": 4,
            "description": "",
            "commands": {
                "good": [
                    {"level": "mark", "duration_us": 9000},
                    {"level": "space", "duration_us": 4500}
                ],
                "torn": [
                    {"level": "mark", "duration_us": 9000},
                    {"level": "mark", "duration_us": 4500}
                ]
            }
        }"#;
        match decode(json) {
            Err(DecodeError::InvalidTrain { name, .. }) => assert_eq!(name, "torn"),
            other => panic!("expected InvalidTrain, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn out_of_band_duration_fails_the_whole_load() {
        let json = r#"{
            "emitter": 17,
            "receiver": 4,
            "description": "",
            "commands": {
                "x": [{"level": "mark", "duration_us": 2000000}]
            }
        }"#;
        assert!(matches!(
            decode(json),
            Err(DecodeError::InvalidTrain { .. })
        ));
    }

    #[test]
    fn malformed_json_is_reported_as_such() {
        assert!(matches!(
            decode("{ not json"),
            Err(DecodeError::MalformedRecord(_))
        ));
    }

    #[test]
    fn missing_name_and_description_decode_to_defaults() {
        let json = r#"{"emitter": 1, "receiver": 2, "commands": {}}"#;
        let set = decode(json).unwrap();
        assert_eq!(set.name(), None);
        assert_eq!(set.description(), "");
        assert!(set.is_empty());
    }
}
