//! The CLI surface, per `spec.md` §6: "thin; out of the hard core,
//! documented only for completeness."

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "bottling-sim", version, about = "Schedule-driven digital twin of an industrial bottling line")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Override `speed_factor` from the config file.
    #[arg(long)]
    pub speed: Option<f64>,

    /// Override `modbus.port` from the config file.
    #[arg(long)]
    pub port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_only_defaults() {
        let cli = Cli::parse_from(["bottling-sim"]);
        assert_eq!(cli.config, PathBuf::from("config.yaml"));
        assert_eq!(cli.speed, None);
        assert_eq!(cli.port, None);
    }

    #[test]
    fn parses_overrides() {
        let cli = Cli::parse_from([
            "bottling-sim",
            "--speed",
            "600.0",
            "--port",
            "5020",
            "--config",
            "custom.yaml",
        ]);
        assert_eq!(cli.speed, Some(600.0));
        assert_eq!(cli.port, Some(5020));
        assert_eq!(cli.config, PathBuf::from("custom.yaml"));
    }
}
