pub mod add;
pub mod articles;
pub mod delete;
pub mod fetch;
pub mod interval;
pub mod list;
pub mod status;
pub mod workers;

use std::time::Duration;

use rsshub_core::{AppConfig, ControlClient};

/// Client for the control endpoint of the running fetcher
pub fn control_client(config: &AppConfig) -> ControlClient {
    ControlClient::new(
        config.control.addr.clone(),
        Duration::from_secs(config.control.request_timeout_secs),
    )
}
