#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::module_name_repetitions
)]

//! Sable, a UCI chess engine written in Rust.

mod cli;
mod config;
mod definitions;
mod engine;
mod errors;
mod evaluation;
mod historytable;
mod movepicker;
mod position;
mod search;
mod transpositiontable;
mod uci;

use cli::Subcommands::Bench;

/// The name of the engine.
pub static NAME: &str = "Sable";
/// The version of the engine.
pub static VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    if std::env::args_os().len() == 1 {
        // fast path to UCI:
        return uci::main_loop();
    }

    let cli = <cli::Cli as clap::Parser>::parse();

    match cli.subcommand {
        Some(Bench { depth }) => uci::bench(depth),
        None => uci::main_loop(),
    }
}
