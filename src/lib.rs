//! Watches remote documents and posts a webhook notification when the size
//! they advertise changes.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod lane;
pub mod notifier;
pub mod probe;
pub mod shutdown;
pub mod store;
pub mod worker;

pub use config::Config;
pub use error::Error;
pub use fetcher::SizeFetcher;
pub use lane::{Lane, LaneHandle};
pub use notifier::Notifier;
pub use probe::ConnectivityProbe;
pub use store::{ChangeSet, ChangeStore, ObservationBatch, SizeRecord};
pub use worker::{Monitor, TickOutcome, monitor_documents};

use reqwest::Client;
use std::time::Duration;

/// Builds a client that doesn't keep idle connections around, so every
/// request's connection is closed once its response is dropped.
pub(crate) fn http_client(timeout: Duration) -> Result<Client, Error> {
    Ok(Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(0)
        .build()?)
}
