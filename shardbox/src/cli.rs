use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Shardbox is a multi-tenant JSON document store and ephemeral cache.
#[derive(Parser, Debug)]
#[command(name = "shardbox", version)]
pub struct Cli {
    /// Path to the configuration file. Default: "shardbox.toml"
    #[arg(short, long, default_value = "shardbox.toml")]
    pub config: PathBuf,

    /// Path to the users.toml file. Default: "users.toml"
    #[arg(short, long, default_value = "users.toml")]
    pub users: PathBuf,

    /// Subcommand.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the server.
    Run,

    /// Check configuration files for errors.
    Configcheck,
}
