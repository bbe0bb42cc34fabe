//! Command-line interface for the statestore binary.

use crate::config::{BackendKind, StoreConfig};
use crate::error::{Result, StoreError};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Namespace metadata store: reference service, oracle and namespace tools.
#[derive(Parser, Debug)]
#[command(name = "statestore")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "STATESTORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Metadata service URL (overrides the config file)
    #[arg(short, long, env = "STATESTORE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Use the in-process store instead of a remote service
    #[arg(long)]
    pub local: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "STATESTORE_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the reference metadata service
    Serve {
        /// Listen address
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// API path prefix
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Fetch ids from the oracle
    Tso {
        /// Number of ids
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },

    /// Namespace operations
    Ns {
        #[command(subcommand)]
        command: NsCommands,
    },

    /// Check the metadata service health
    Health,

    /// Show version information
    Version,
}

/// Namespace subcommands.
#[derive(Subcommand, Debug)]
pub enum NsCommands {
    /// List the children of a directory
    Ls {
        /// Directory id
        dir: u64,
    },

    /// Show an entry
    Stat {
        /// Entry id
        id: u64,
    },

    /// Look up a named child of a directory
    Lookup {
        /// Directory id
        dir: u64,

        /// Child name
        name: String,
    },

    /// Create a directory with an id from the oracle
    Mkdir {
        /// Parent directory id
        parent: u64,

        /// Directory name
        name: String,

        /// Octal mode
        #[arg(short, long, default_value = "755", value_parser = parse_mode)]
        mode: u16,
    },

    /// List the blocks of a file
    Blocks {
        /// File id
        file: u64,
    },
}

fn parse_mode(s: &str) -> std::result::Result<u16, String> {
    u16::from_str_radix(s, 8).map_err(|e| format!("invalid octal mode {}: {}", s, e))
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Load the config file, if any, and apply command-line overrides.
    pub fn store_config(&self) -> Result<StoreConfig> {
        let mut config = match &self.config {
            Some(path) => StoreConfig::from_file(path)?,
            None => StoreConfig::default(),
        };
        if let Some(endpoint) = &self.endpoint {
            config.remote.endpoint = endpoint.clone();
        }
        if self.local {
            config.backend = BackendKind::Local;
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

/// One line of `ns ls` output.
pub fn entry_line(id: u64, kind: &str, name: std::result::Result<&str, StoreError>) -> String {
    match name {
        Ok(name) => format!("{:>12}  {:<9}  {}", id, kind, name),
        Err(e) => format!("{:>12}  {:<9}  <{}>", id, kind, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_ns_mkdir() {
        let cli = Cli::try_parse_from(["statestore", "ns", "mkdir", "1", "home", "--mode", "700"])
            .unwrap();
        match cli.command {
            Commands::Ns {
                command: NsCommands::Mkdir { parent, name, mode },
            } => {
                assert_eq!(parent, 1);
                assert_eq!(name, "home");
                assert_eq!(mode, 0o700);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_bad_mode_rejected() {
        assert!(Cli::try_parse_from(["statestore", "ns", "mkdir", "1", "x", "--mode", "9"]).is_err());
    }

    #[test]
    fn test_overrides_applied() {
        let cli = Cli::try_parse_from([
            "statestore",
            "--endpoint",
            "http://10.0.0.5:8089",
            "--log-level",
            "warn",
            "tso",
            "-n",
            "4",
        ])
        .unwrap();
        let config = cli.store_config().unwrap();
        assert_eq!(config.remote.endpoint, "http://10.0.0.5:8089");
        assert_eq!(config.observability.log_level, "warn");
        assert!(matches!(cli.command, Commands::Tso { count: 4 }));
    }

    #[test]
    fn test_local_flag_and_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"service":{{"api_prefix":"/meta"}}}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = Cli::try_parse_from(["statestore", "--config", &path, "--local", "health"]).unwrap();
        let config = cli.store_config().unwrap();
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.service.api_prefix, "/meta");
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let cli = Cli::try_parse_from(["statestore", "--endpoint", "nope", "health"]).unwrap();
        assert!(cli.store_config().is_err());
    }

    #[test]
    fn test_entry_line() {
        assert!(entry_line(2, "file", Ok("a.txt")).ends_with("a.txt"));
        let line = entry_line(3, "directory", Err(StoreError::Decode("bad".into())));
        assert!(line.contains("Decode failure"));
    }
}
