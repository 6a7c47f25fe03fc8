use std::path::PathBuf;

use anyhow::Context;
use structopt::StructOpt;

mod record;
mod send;
mod vcdutils;

use irpulse_core::serial::SerialTransport;
use irpulse_core::CommandSet;

#[derive(Debug, StructOpt)]
#[structopt(name = "irpulse", about = "Capture and replay infrared remote commands")]
struct Opt {
    /// Serial device of the IR transceiver. Defaults to the first port found.
    #[structopt(long = "device", parse(from_os_str))]
    serial: Option<PathBuf>,
    #[structopt(short, long)]
    debug: bool,
    #[structopt(subcommand)]
    cmd: CliCommand,
}

#[derive(StructOpt, Debug)]
enum CliCommand {
    /// Create an empty command set file
    New {
        file: PathBuf,
        /// GPIO channel wired to the IR emitter
        #[structopt(long)]
        emitter: u32,
        /// GPIO channel wired to the IR receiver
        #[structopt(long)]
        receiver: u32,
        #[structopt(long)]
        name: Option<String>,
        #[structopt(long, default_value = "")]
        description: String,
    },
    /// Capture a command from the receiver and store it in the set
    Add { file: PathBuf, command: String },
    /// Transmit a stored command
    Emit { file: PathBuf, command: String },
    /// Delete a stored command
    Remove { file: PathBuf, command: String },
    /// List the commands in a set
    Show { file: PathBuf },
    /// Write a stored command to a VCD waveform file
    ExportVcd {
        file: PathBuf,
        command: String,
        out: PathBuf,
    },
    /// Import a single-wire VCD capture as a command
    ImportVcd {
        file: PathBuf,
        command: String,
        vcd: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    let loglevel = if opt.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::builder().filter_level(loglevel).init();

    match opt.cmd {
        CliCommand::New { file, emitter, receiver, name, description } => {
            let mut set = CommandSet::new(emitter, receiver).with_description(description);
            if let Some(name) = name {
                set = set.with_name(name);
            }
            set.save_as(&file)
                .with_context(|| format!("could not write {}", file.display()))?;
            println!("Created {}", file.display());
            Ok(())
        }
        CliCommand::Add { file, command } => {
            let transport = open_transport(&opt.serial)?;
            record::add(&transport, &file, &command)
        }
        CliCommand::Emit { file, command } => {
            let transport = open_transport(&opt.serial)?;
            send::emit(&transport, &file, &command)
        }
        CliCommand::Remove { file, command } => {
            let mut set = load_set(&file)?;
            set.remove(&command)?;
            set.save_as(&file)?;
            println!("Removed `{}`", command);
            Ok(())
        }
        CliCommand::Show { file } => {
            let set = load_set(&file)?;
            if let Some(name) = set.name() {
                println!("{} (emitter {}, receiver {})", name, set.emitter_gpio(), set.receiver_gpio());
            } else {
                println!("emitter {}, receiver {}", set.emitter_gpio(), set.receiver_gpio());
            }
            if !set.description().is_empty() {
                println!("{}", set.description());
            }
            for (name, train) in set.iter() {
                println!(
                    "  {:<20} {:>4} pulses  {:>7} us",
                    name,
                    train.len(),
                    train.total_duration().as_micros()
                );
            }
            Ok(())
        }
        CliCommand::ExportVcd { file, command, out } => {
            let set = load_set(&file)?;
            let train = set
                .get(&command)
                .with_context(|| format!("no command named `{}`", command))?;
            vcdutils::write_train_file(&out, train)
                .with_context(|| format!("could not write {}", out.display()))?;
            println!("Wrote {}", out.display());
            Ok(())
        }
        CliCommand::ImportVcd { file, command, vcd } => {
            let mut set = load_set(&file)?;
            let train = vcdutils::train_from_vcd_file(&vcd)
                .with_context(|| format!("could not import {}", vcd.display()))?;
            println!("Imported `{}` ({} pulses)", command, train.len());
            set.insert(command, train);
            set.save_as(&file)?;
            Ok(())
        }
    }
}

fn load_set(file: &PathBuf) -> anyhow::Result<CommandSet> {
    CommandSet::load(file).with_context(|| format!("could not load {}", file.display()))
}

fn open_transport(serial: &Option<PathBuf>) -> anyhow::Result<SerialTransport> {
    let path = if let Some(path) = serial {
        path.clone()
    } else {
        serialport::available_ports()?
            .first()
            .map(|port| PathBuf::from(&port.port_name))
            .context("no serial port found, pass --device")?
    };

    log::debug!("opening transceiver on {}", path.display());
    Ok(SerialTransport::open(&path)?)
}
