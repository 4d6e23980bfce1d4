use clap::{Parser, Subcommand};

#[derive(Parser)]
#[clap(author, version, about)]
pub struct Cli {
    #[clap(subcommand)]
    pub subcommand: Option<Subcommands>,
}

#[derive(Subcommand)]
pub enum Subcommands {
    /// Run a fixed-depth search over the built-in benchmark suite.
    Bench {
        /// Search depth for every benchmark position.
        #[clap(long, default_value_t = 8)]
        depth: i32,
    },
}
