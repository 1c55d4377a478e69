use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kbchat")]
#[command(about = "Streaming chat client for knowledge-base assistant backends")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a message and stream the answer to stdout
    Ask {
        /// The message to send
        message: String,

        /// Continue an existing session
        #[arg(short, long)]
        session: Option<String>,

        /// Knowledge base IDs to answer from (repeatable)
        #[arg(short, long)]
        knowledge: Vec<String>,

        /// Allow the backend to consult online sources
        #[arg(long)]
        online: bool,

        /// User ID to send as (defaults to the configured one)
        #[arg(short, long)]
        user: Option<String>,

        /// Try configured fallback endpoints when the primary is down
        #[arg(long)]
        fallback: bool,
    },

    /// Show or initialize the configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}
