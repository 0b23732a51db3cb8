use thiserror::Error;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::cse::{CseConfig, RequestConfig};
use crate::util::config::StoredConfig;
use crate::util::store::{Store, StoreError};

const DEFAULT_CSE_BASE: &str = "id-in";
const DEFAULT_DASHBOARD_ORIGINATOR: &str = "Cdashboard";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Failed to read/write device identity: {0}")]
    ReadWriteConfig(#[from] StoreError),

    #[error("no device identity stored, --cse-endpoint, --originator and --application are required")]
    Missing,
}

fn request_config(cli: &Cli, defaults: &RequestConfig) -> RequestConfig {
    RequestConfig {
        timeout: cli.request_timeout.unwrap_or(defaults.timeout),
        poll_timeout: cli.poll_timeout.unwrap_or(defaults.poll_timeout),
        min_interval: cli.poll_min_interval.unwrap_or(defaults.min_interval),
        max_backoff: cli.poll_max_backoff.unwrap_or(defaults.max_backoff),
        reprovision_interval: cli
            .reprovision_interval
            .unwrap_or(defaults.reprovision_interval),
    }
}

fn warn_if_ignored<T: PartialEq + std::fmt::Display>(arg: &str, given: &Option<T>, stored: &T) {
    if let Some(given) = given
        && given != stored
    {
        warn!("ignoring --{arg} argument {given}, this device is registered as {stored}");
    }
}

/// Work out the identity this device uses with the CSE.
///
/// A complete identity given on the command line (endpoint, originator and
/// application) replaces any stored one and is stored for the next start.
/// Otherwise the stored identity is used, with request settings from the
/// command line applied on top.
pub async fn load_identity(cli: &Cli, config_store: &Store) -> Result<CseConfig, IdentityError> {
    let stored: Option<CseConfig> = config_store.read("/", CseConfig::default_name()).await?;

    if let (Some(endpoint), Some(originator), Some(application)) =
        (&cli.cse_endpoint, &cli.originator, &cli.application)
    {
        let config = CseConfig {
            endpoint: endpoint.clone(),
            cse_base: cli
                .cse_base
                .clone()
                .unwrap_or_else(|| DEFAULT_CSE_BASE.to_owned()),
            originator: originator.clone(),
            application: application.clone(),
            dashboard_originator: cli
                .dashboard_originator
                .clone()
                .unwrap_or_else(|| DEFAULT_DASHBOARD_ORIGINATOR.to_owned()),
            request: request_config(cli, &RequestConfig::default()),
        };

        if let Some(stored) = &stored
            && stored != &config
        {
            warn!(
                "replacing stored identity {0} at {1}",
                stored.originator, stored.endpoint
            );
        }

        config_store
            .write("/", CseConfig::default_name(), &config)
            .await?;
        info!("using identity {} at {}", config.originator, config.endpoint);
        return Ok(config);
    }

    let Some(stored) = stored else {
        return Err(IdentityError::Missing);
    };

    warn_if_ignored("cse-endpoint", &cli.cse_endpoint, &stored.endpoint);
    warn_if_ignored("originator", &cli.originator, &stored.originator);
    warn_if_ignored("application", &cli.application, &stored.application);

    let config = CseConfig {
        cse_base: cli.cse_base.clone().unwrap_or(stored.cse_base.clone()),
        dashboard_originator: cli
            .dashboard_originator
            .clone()
            .unwrap_or(stored.dashboard_originator.clone()),
        request: request_config(cli, &stored.request),
        ..stored
    };
    info!("using stored identity {} at {}", config.originator, config.endpoint);
    Ok(config)
}
