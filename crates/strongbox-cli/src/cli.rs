use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "strongbox",
    about = "Encrypted property containers on top of SQLite",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Read configuration from this file instead of the default location.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Write, read and delete a probe value through the encrypted store.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print a value.
    Get {
        /// Container, as `component/table`.
        uri: String,
        key: String,
        /// Print the value as base64 instead of text.
        #[arg(long)]
        base64: bool,
    },
    /// Store a value, replacing any previous one.
    Put {
        uri: String,
        key: String,
        value: String,
        /// Treat `value` as base64-encoded bytes.
        #[arg(long)]
        base64: bool,
    },
    /// Delete a value.
    Remove { uri: String, key: String },
    /// List the keys of a container.
    Keys { uri: String },
    /// Delete every value of a container.
    Clear {
        uri: String,
        /// Required to confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
    /// Import values from the legacy database.
    Migrate,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
    /// Print the effective configuration.
    Show,
}
