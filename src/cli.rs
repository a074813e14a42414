//! Command-line interface definition for traefik-tower
//!
//! The service is mostly configured through environment variables, so the
//! CLI is small: run the server, or load and validate the configuration and
//! exit.

use clap::{Parser, Subcommand};

/// traefik-tower - forward-auth adapter for Traefik
///
/// Verifies bearer tokens against an OAuth2 server, a policy engine or a
/// managed identity provider and answers Traefik with 200, 401 or 500.
#[derive(Parser, Debug, Clone)]
#[command(name = "traefik-tower")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "TOWER_CONFIG", default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute, defaults to `serve`
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands for traefik-tower
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start the forward-auth server
    Serve {
        /// Override the bind address
        #[arg(long)]
        host: Option<String>,

        /// Override the bind port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Load and validate the configuration, print the resolved strategy
    CheckConfig,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Path of the configuration file to load
    pub fn config_path(&self) -> &str {
        self.config.as_deref().unwrap_or("config/config.yaml")
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            command: None,
        }
    }
}
