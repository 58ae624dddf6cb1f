//! Definition of the command line interface (CLI).

use std::fs;
use std::io;

use clap::{Parser, Subcommand};
use reportify::{bail, ResultExt};

use pivot_common::boot::tryboot::parse_autoboot;

use crate::system::boot_choosers::SlotStatus;
use crate::system::slots::SlotIdx;
use crate::system::{System, SystemResult};

pub fn main() -> SystemResult<()> {
    init_logging();

    let args = Args::parse();
    let system = System::initialize()?;
    match &args.command {
        Command::Status => print_status(&system)?,
        Command::Bootname => {
            let bootname = system
                .boot_chooser()
                .get_current_bootname()
                .whatever("unable to get current bootname")?;
            println!("{bootname}");
        }
        Command::Primary(primary_cmd) => match primary_cmd {
            PrimaryCommand::Get => {
                let primary = system
                    .boot_chooser()
                    .get_primary(system.slots())
                    .whatever("unable to get primary slot")?;
                println!("{}", system.slots()[primary].name());
            }
            PrimaryCommand::Set { slot } => {
                let slot = find_slot(&system, slot)?;
                system
                    .boot_chooser()
                    .set_primary(system.slots(), slot)
                    .whatever("unable to set primary slot")?;
            }
        },
        Command::State(state_cmd) => match state_cmd {
            StateCommand::Get { slot } => {
                let slot = find_slot(&system, slot)?;
                let status = system
                    .boot_chooser()
                    .get_state(system.slots(), slot)
                    .whatever("unable to get slot state")?;
                println!("{status}");
            }
            StateCommand::MarkGood { slot } => {
                let slot = find_slot(&system, slot)?;
                system
                    .boot_chooser()
                    .set_state(system.slots(), slot, SlotStatus::Good)
                    .whatever("unable to mark slot good")?;
            }
            StateCommand::MarkBad { slot } => {
                let slot = find_slot(&system, slot)?;
                system
                    .boot_chooser()
                    .set_state(system.slots(), slot, SlotStatus::Bad)
                    .whatever("unable to mark slot bad")?;
            }
        },
    }
    Ok(())
}

fn find_slot(system: &System, name: &str) -> SystemResult<SlotIdx> {
    let Some((idx, _)) = system.slots().find_by_name(name) else {
        bail!("unable to find slot {name:?}");
    };
    Ok(idx)
}

fn print_status(system: &System) -> SystemResult<()> {
    let chooser = system.boot_chooser();
    let bootname = chooser
        .get_current_bootname()
        .whatever("unable to get current bootname")?;
    let primary = chooser
        .get_primary(system.slots())
        .whatever("unable to get primary slot")?;
    println!("boot chooser: {}", chooser.name());
    println!("booted: {bootname}");
    println!("primary: {}", system.slots()[primary].name());
    for (idx, slot) in system.slots().iter() {
        if slot.bootname().is_none() {
            continue;
        }
        let status = chooser
            .get_state(system.slots(), idx)
            .whatever("unable to get slot state")?;
        println!("slot {}: {status}", slot.name());
    }
    // The on-disk configuration is what the firmware will consult, show it
    // as well if it is readable.
    if let Ok(text) = fs::read_to_string(system.config().autoboot_path()) {
        if let Ok(autoboot) = parse_autoboot(&text) {
            println!("autoboot all: {}", autoboot.all);
            if let Some(tryboot) = autoboot.tryboot {
                println!("autoboot tryboot: {tryboot}");
            }
        }
    }
    Ok(())
}

fn init_logging() {
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_target(false)
        .compact();
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .event_format(format)
        .init();
}

/// Manage the boot slots of a Pivot system.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the boot status of the system.
    Status,
    /// Print the bootname of the booted slot.
    Bootname,
    /// Manage the primary slot.
    #[command(subcommand)]
    Primary(PrimaryCommand),
    /// Manage slot health states.
    #[command(subcommand)]
    State(StateCommand),
}

#[derive(Debug, Subcommand)]
enum PrimaryCommand {
    /// Print the slot used on the next normal boot.
    Get,
    /// Switch the primary slot.
    ///
    /// Outside of a trial boot this arms a reversible one-shot boot into the
    /// given slot; during a trial boot it persistently commits the slot.
    Set { slot: String },
}

#[derive(Debug, Subcommand)]
enum StateCommand {
    /// Print the state of a slot.
    Get { slot: String },
    /// Mark a slot as good.
    MarkGood { slot: String },
    /// Mark a slot as bad.
    MarkBad { slot: String },
}
