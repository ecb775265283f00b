//! Command line and environment configuration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing::trace;

use crate::model::StartRequest;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "rtmp-stress",
    version,
    about = "Load generator for RTMP media servers"
)]
pub struct Args {
    /// Address of the metrics exporter
    #[arg(
        long = "web.listen-address",
        env = "STRESS_METRICS_ADDR",
        default_value = "0.0.0.0:9132",
        value_parser = parse_listen_address
    )]
    pub metrics_addr: SocketAddr,

    /// Path under which metrics are exposed
    #[arg(
        long = "web.telemetry-path",
        env = "STRESS_METRICS_PATH",
        default_value = "/metrics",
        value_parser = parse_telemetry_path
    )]
    pub telemetry_path: String,

    /// Address of the control API
    #[arg(
        long = "api.addrs",
        env = "STRESS_API_ADDR",
        default_value = "0.0.0.0:8083",
        value_parser = parse_listen_address
    )]
    pub api_addr: SocketAddr,

    /// RTMP server used when a start request names none
    #[arg(long, env = "STRESS_SERVER_URL")]
    pub server: Option<String>,

    /// FLV file replayed by every publisher
    #[arg(long = "flv-file", visible_alias = "flv_file", env = "STRESS_FLV_FILE")]
    pub flv_file: PathBuf,

    /// JSON test plan started right after boot
    #[arg(short, long, env = "STRESS_PLAN_FILE")]
    pub file: Option<PathBuf>,

    /// Redis server taking `start_test` / `stop_test` commands
    #[cfg(feature = "remote")]
    #[arg(long = "redis", env = "STRESS_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Field of this instance in the redis status map
    #[cfg(feature = "remote")]
    #[arg(long = "redis.name", env = "STRESS_REDIS_NAME", default_value = "stress_test")]
    pub redis_name: String,

    /// Log level of this crate
    #[arg(long = "log-level", env = "STRESS_LOG", default_value = "debug")]
    pub log_level: LevelFilter,
}

impl Args {
    /// Checks clap cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.flv_file.as_os_str().is_empty() {
            bail!("flv file not specified");
        }
        Ok(())
    }
}

/// Accept `host:port` as well as the bare `:port` form.
fn parse_listen_address(value: &str) -> Result<SocketAddr, String> {
    let value = if value.starts_with(':') {
        format!("0.0.0.0{value}")
    } else {
        value.to_string()
    };
    value
        .parse()
        .map_err(|e| format!("invalid listen address {value}: {e}"))
}

fn parse_telemetry_path(value: &str) -> Result<String, String> {
    if !value.starts_with('/') || value == "/" {
        return Err(format!("telemetry path must start with '/' and not be the root: {value}"));
    }
    Ok(value.to_string())
}

/// Read a JSON test plan: `{"server": "...", "model_count": 2, "client_count": 3}`
pub fn read_plan_file(path: &Path) -> anyhow::Result<StartRequest> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read test plan {}", path.display()))?;
    let plan: StartRequest =
        serde_json::from_str(&file_content).context("invalid test plan provided")?;

    trace!("read test plan: {plan:?}");
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("rtmp-stress").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["--flv-file", "sample.flv"]).unwrap();

        assert_eq!(args.metrics_addr, "0.0.0.0:9132".parse().unwrap());
        assert_eq!(args.api_addr, "0.0.0.0:8083".parse().unwrap());
        assert_eq!(args.telemetry_path, "/metrics");
        assert_eq!(args.flv_file, PathBuf::from("sample.flv"));
        assert_eq!(args.log_level, LevelFilter::DEBUG);
        assert!(args.file.is_none());
    }

    #[cfg(feature = "remote")]
    #[test]
    fn test_redis_flags() {
        let args = parse(&["--flv-file", "a.flv"]).unwrap();
        assert!(args.redis_url.is_none());
        assert_eq!(args.redis_name, "stress_test");

        let args = parse(&[
            "--flv-file",
            "a.flv",
            "--redis",
            "localhost:6379",
            "--redis.name",
            "edge-1",
        ])
        .unwrap();
        assert_eq!(args.redis_url.as_deref(), Some("localhost:6379"));
        assert_eq!(args.redis_name, "edge-1");
    }

    #[test]
    fn test_flv_file_is_required() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--flv-file", ""]).unwrap().validate().is_err());
    }

    #[test]
    fn test_bare_port_addresses() {
        let args = parse(&["--flv_file", "a.flv", "--api.addrs", ":9000"]).unwrap();
        assert_eq!(args.api_addr, "0.0.0.0:9000".parse().unwrap());
    }

    #[test]
    fn test_telemetry_path_must_be_absolute() {
        assert!(parse(&["--flv-file", "a.flv", "--web.telemetry-path", "metrics"]).is_err());
        assert!(parse(&["--flv-file", "a.flv", "--web.telemetry-path", "/"]).is_err());
    }

    #[test]
    fn test_read_plan_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"server": "rtmp://localhost/live", "model_count": 2, "client_count": 3}}"#
        )
        .unwrap();

        let plan = read_plan_file(file.path()).unwrap();
        assert_eq!(plan.server_url, "rtmp://localhost/live");
        assert_eq!(plan.model_count, 2);
        assert_eq!(plan.client_count, 3);
    }

    #[test]
    fn test_invalid_plan_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        assert!(read_plan_file(file.path()).is_err());
        assert!(read_plan_file(Path::new("/nonexistent/plan.json")).is_err());
    }
}
