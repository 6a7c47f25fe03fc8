use std::path::Path;

use anyhow::Context;
use irpulse_core::{CommandSet, Transport};

/// Capture one command from the receiver and store it in the set file.
pub fn add(transport: &dyn Transport, file: &Path, command: &str) -> anyhow::Result<()> {
    let mut set = CommandSet::load(file)
        .with_context(|| format!("could not load {}", file.display()))?;

    println!("Detecting IR command... point the remote and press the button");
    set.add(transport, command)
        .context("capture failed, try again")?;
    println!("Received.");

    set.save_as(file)
        .with_context(|| format!("could not write {}", file.display()))?;
    Ok(())
}
