// CLI definitions using clap

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "klipperfleet")]
#[command(author, version, about = "Fleet firmware lifecycle manager for Klipper MCUs")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API server (the default)
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0:8321")]
        listen: String,
    },

    /// Enumerate serial, CAN, DFU and host-process devices
    #[command(visible_alias = "d")]
    Discover,

    /// Show the registered fleet with live status
    Fleet,

    /// Run a batch pipeline and follow its log
    /// (build, flash-ready, flash-all, build-flash-ready, build-flash-all)
    Batch {
        /// Batch action to run
        action: String,
    },
}
