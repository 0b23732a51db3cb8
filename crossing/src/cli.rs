use clap::Parser;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use crate::util::http::Uri;

fn parse_duration(s: &str) -> Result<Duration, ParseIntError> {
    let millis: u64 = s.parse()?;
    Ok(Duration::from_millis(millis))
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)] // read from Cargo.toml
pub struct Cli {
    /// Base URI of the CSE host, eg. "http://3.88.130.137:80"
    #[arg(env = "CROSSING_CSE_ENDPOINT", long = "cse-endpoint", value_name = "uri")]
    pub cse_endpoint: Option<Uri>,

    /// Resource name of the CSE base [default: id-in]
    #[arg(env = "CROSSING_CSE_BASE", long = "cse-base", value_name = "name")]
    pub cse_base: Option<String>,

    /// Originator identifying this device to the CSE
    #[arg(
        env = "CROSSING_ORIGINATOR",
        long = "originator",
        value_name = "id",
        requires = "cse_endpoint"
    )]
    pub originator: Option<String>,

    /// Resource name of the application entity, eg. "intersectionA"
    #[arg(
        env = "CROSSING_APPLICATION",
        long = "application",
        value_name = "name",
        requires = "cse_endpoint"
    )]
    pub application: Option<String>,

    /// Originator of the dashboard allowed to change the lights [default: Cdashboard]
    #[arg(
        env = "CROSSING_DASHBOARD_ORIGINATOR",
        long = "dashboard-originator",
        value_name = "id"
    )]
    pub dashboard_originator: Option<String>,

    /// CSE request timeout in milliseconds
    #[arg(
        env = "CROSSING_REQUEST_TIMEOUT_MS",
        long = "request-timeout-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub request_timeout: Option<Duration>,

    /// Polling channel timeout in milliseconds, must exceed the CSE hold window
    #[arg(
        env = "CROSSING_POLL_TIMEOUT_MS",
        long = "poll-timeout-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub poll_timeout: Option<Duration>,

    /// Initial back-off in milliseconds after the polling channel fails
    #[arg(
        env = "CROSSING_POLL_MIN_INTERVAL_MS",
        long = "poll-min-interval-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub poll_min_interval: Option<Duration>,

    /// Maximum back-off in milliseconds after the polling channel fails
    #[arg(
        env = "CROSSING_POLL_MAX_BACKOFF_MS",
        long = "poll-max-backoff-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub poll_max_backoff: Option<Duration>,

    /// Interval in milliseconds between provisioning attempts while the
    /// resource tree is incomplete
    #[arg(
        env = "CROSSING_REPROVISION_INTERVAL_MS",
        long = "reprovision-interval-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub reprovision_interval: Option<Duration>,

    /// Serial device connected to the peer board. Uses stdin/stdout if not set
    #[arg(env = "CROSSING_RELAY_PATH", long = "relay-path", value_name = "path")]
    pub relay_path: Option<PathBuf>,

    /// Remove this device's resources from the CSE and exit
    #[arg(long = "deregister")]
    pub deregister: bool,
}

pub fn parse() -> Cli {
    Parser::parse()
}
