use std::path::Path;

use anyhow::Context;
use irpulse_core::{CommandSet, Transport};

/// Replay a stored command through the transceiver.
pub fn emit(transport: &dyn Transport, file: &Path, command: &str) -> anyhow::Result<()> {
    let set = CommandSet::load(file)
        .with_context(|| format!("could not load {}", file.display()))?;

    log::info!("sending `{}`", command);
    set.emit(transport, command)?;
    log::info!("sent");

    Ok(())
}
