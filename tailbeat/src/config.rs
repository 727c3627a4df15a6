//! Configuration for the four parameters spec §6 names, loaded from the
//! environment with CLI overrides layered on top (spec §10.D), following
//! the teacher's `Config::from_env()` + `clap::Parser` override pattern.

use std::env;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone)]
pub struct Config {
    pub file_path: PathBuf,
    pub general_stats_period_secs: u32,
    pub traffic_gauge_period_secs: u32,
    pub traffic_gauge_threshold_rps: f64,
    pub read_from_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            file_path: PathBuf::from("/tmp/access.log"),
            general_stats_period_secs: 10,
            traffic_gauge_period_secs: 120,
            traffic_gauge_threshold_rps: 10.0,
            read_from_start: false,
        }
    }
}

impl Config {
    /// Reads the four parameters from the environment, falling back to
    /// spec §6's defaults. `.env`, if present, has already been loaded by
    /// the caller (`dotenvy::dotenv().ok()` in `main`).
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let file_path = env::var("FILE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.file_path);

        let general_stats_period_secs = parse_env_or(
            "GENERAL_STATS_PERIOD_SECS",
            defaults.general_stats_period_secs,
        )?;
        let traffic_gauge_period_secs = parse_env_or(
            "TRAFFIC_GAUGE_PERIOD_SECS",
            defaults.traffic_gauge_period_secs,
        )?;
        let traffic_gauge_threshold_rps = parse_env_or(
            "TRAFFIC_GAUGE_THRESHOLD_RPS",
            defaults.traffic_gauge_threshold_rps,
        )?;
        let read_from_start = env::var("READ_FROM_START")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.read_from_start);

        Ok(Self {
            file_path,
            general_stats_period_secs,
            traffic_gauge_period_secs,
            traffic_gauge_threshold_rps,
            read_from_start,
        })
    }

    /// Overlays CLI flags (when present) on top of an already-loaded
    /// config, mirroring the teacher's `Args` overriding `ExtConfig`
    /// fields for `port`/`host`.
    pub fn apply_args(mut self, args: &Args) -> Self {
        if let Some(path) = &args.file_path {
            self.file_path = path.clone();
        }
        if let Some(secs) = args.general_stats_period_secs {
            self.general_stats_period_secs = secs;
        }
        if let Some(secs) = args.traffic_gauge_period_secs {
            self.traffic_gauge_period_secs = secs;
        }
        if let Some(rps) = args.traffic_gauge_threshold_rps {
            self.traffic_gauge_threshold_rps = rps;
        }
        if args.read_from_start {
            self.read_from_start = true;
        }
        self
    }

    /// Malformed configuration (spec §6's exit-code table: "1 on malformed
    /// configuration").
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.general_stats_period_secs == 0 {
            anyhow::bail!("general-stats-period-secs must be greater than zero");
        }
        if self.traffic_gauge_period_secs == 0 {
            anyhow::bail!("traffic-gauge-period-secs must be greater than zero");
        }
        if !(self.traffic_gauge_threshold_rps.is_finite() && self.traffic_gauge_threshold_rps > 0.0)
        {
            anyhow::bail!("traffic-gauge-threshold-rps must be a positive, finite number");
        }
        Ok(())
    }
}

fn parse_env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|err| anyhow::anyhow!("invalid {key}={raw:?}: {err}")),
        Err(_) => Ok(default),
    }
}

/// CLI surface (spec §6 "Configuration (from the CLI collaborator)").
#[derive(Debug, Parser)]
#[command(name = "tailbeat", about = "Tails a Common Log Format access log and reports periodic stats")]
pub struct Args {
    /// Path to the access log file to tail.
    #[arg(long, env = "FILE_PATH")]
    pub file_path: Option<PathBuf>,

    /// Period, in seconds, of the general-statistics schedule.
    #[arg(long, env = "GENERAL_STATS_PERIOD_SECS")]
    pub general_stats_period_secs: Option<u32>,

    /// Period, in seconds, of the high-traffic gauge schedule.
    #[arg(long, env = "TRAFFIC_GAUGE_PERIOD_SECS")]
    pub traffic_gauge_period_secs: Option<u32>,

    /// Requests-per-second threshold at which the gauge reports high
    /// traffic.
    #[arg(long, env = "TRAFFIC_GAUGE_THRESHOLD_RPS")]
    pub traffic_gauge_threshold_rps: Option<f64>,

    /// Read the whole file from byte zero instead of tailing from the end.
    #[arg(long)]
    pub read_from_start: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.file_path, PathBuf::from("/tmp/access.log"));
        assert_eq!(config.general_stats_period_secs, 10);
        assert_eq!(config.traffic_gauge_period_secs, 120);
        assert_eq!(config.traffic_gauge_threshold_rps, 10.0);
    }

    #[test]
    fn zero_period_fails_validation() {
        let mut config = Config::default();
        config.general_stats_period_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn cli_args_override_defaults() {
        let config = Config::default();
        let args = Args {
            file_path: Some(PathBuf::from("/var/log/custom.log")),
            general_stats_period_secs: Some(5),
            traffic_gauge_period_secs: None,
            traffic_gauge_threshold_rps: None,
            read_from_start: true,
        };
        let merged = config.apply_args(&args);
        assert_eq!(merged.file_path, PathBuf::from("/var/log/custom.log"));
        assert_eq!(merged.general_stats_period_secs, 5);
        assert_eq!(merged.traffic_gauge_period_secs, 120);
        assert!(merged.read_from_start);
    }
}
