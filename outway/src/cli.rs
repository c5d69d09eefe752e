use std::path::PathBuf;

use clap::{Parser, Subcommand};

use outway_lib::config;

/// Outway - policy-driven egress DNS router
#[derive(Clone, Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Run the DNS server in the foreground
    Run {
        /// Configuration file path
        #[arg(short, long, env = config::ENV_VAR, default_value = config::DEFAULT_PATH)]
        config: PathBuf,
    },
    /// Tear down all firewall/route state this backend has ever installed
    Cleanup {
        /// Configuration file path
        #[arg(short, long, env = config::ENV_VAR, default_value = config::DEFAULT_PATH)]
        config: PathBuf,
    },
    /// Replace the running binary with a newer release
    SelfUpdate {
        /// Include prerelease versions when selecting an update
        #[arg(long)]
        prerelease: bool,
    },
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_explicit_config_path() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["outway", "run", "--config", "/tmp/outway.yaml"])?;
        assert!(matches!(cli.command, Command::Run { config } if config == PathBuf::from("/tmp/outway.yaml")));
        Ok(())
    }

    #[test]
    fn run_falls_back_to_default_config_path() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["outway", "run"])?;
        assert!(matches!(cli.command, Command::Run { config } if config == PathBuf::from(config::DEFAULT_PATH)));
        Ok(())
    }

    #[test]
    fn self_update_defaults_to_stable_only() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["outway", "self-update"])?;
        assert!(matches!(cli.command, Command::SelfUpdate { prerelease: false }));
        Ok(())
    }

    #[test]
    fn missing_subcommand_fails_to_parse() {
        assert!(Cli::try_parse_from(["outway"]).is_err());
    }
}
