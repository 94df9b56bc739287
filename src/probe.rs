use log::debug;
use reqwest::Client;
use std::time::Duration;

use crate::error::Error;
use crate::lane::Lane;

/// Checks whether the network is reachable by fetching a well-known endpoint.
pub struct ConnectivityProbe {
    client: Client,
    endpoint: String,
    lane: Lane,
}

impl ConnectivityProbe {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        Ok(Self {
            client: crate::http_client(timeout)?,
            endpoint: endpoint.into(),
            lane: Lane::new("connectivity"),
        })
    }

    /// Returns `true` only if the endpoint answered with a non-error status
    /// and its body could be read in full. Network failures never surface as
    /// errors, they just make the check return `false`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LaneClosed`] if the probe has been shut down.
    pub async fn check_available(&self) -> Result<bool, Error> {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();

        self.lane
            .submit(move || async move { Ok(is_reachable(&client, &endpoint).await) })?
            .join()
            .await
    }

    pub async fn shutdown(&self) {
        self.lane.shutdown().await;
    }
}

async fn is_reachable(client: &Client, endpoint: &str) -> bool {
    let response = match client.get(endpoint).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!("Connectivity check against {endpoint} failed: {e}");
            return false;
        }
    };

    match response.error_for_status() {
        Ok(response) => response.bytes().await.is_ok(),
        Err(e) => {
            debug!("Connectivity check against {endpoint} failed: {e}");
            false
        }
    }
}
