//! HTTP part fetching.
//!
//! Feature-gated behind `http` to keep the default build minimal. The whole
//! body is read into memory; parts are decoded in one go.

use std::time::Duration;

use crate::effects::Fetch;
use crate::error::FetchError;

/// Upper bound on a single part download.
const MAX_PART_BYTES: u64 = 256 * 1024 * 1024;

pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(60)))
            .build();
        Self {
            agent: config.into(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        log::debug!("loopwell: GET {}", locator);
        let response = self
            .agent
            .get(locator)
            .call()
            .map_err(|e| FetchError::new(locator, e))?;
        response
            .into_body()
            .with_config()
            .limit(MAX_PART_BYTES)
            .read_to_vec()
            .map_err(|e| FetchError::new(locator, e))
    }
}
