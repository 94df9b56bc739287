use log::{debug, error, info, warn};
use tokio::{
    select,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Error;
use crate::fetcher::SizeFetcher;
use crate::notifier::Notifier;
use crate::probe::ConnectivityProbe;
use crate::store::{ChangeSet, ChangeStore, ObservationBatch};

/// What a single check ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The network was unreachable, nothing was fetched.
    Offline,
    /// Sizes were fetched but nothing changed.
    Unchanged { fetched: usize, total: usize },
    /// These documents changed and a notification was queued for them.
    Changed(ChangeSet),
}

/// Periodically checks the configured documents for size changes.
pub struct Monitor {
    config: Config,
    probe: ConnectivityProbe,
    fetcher: SizeFetcher,
    store: ChangeStore,
    notifier: Notifier,
}

impl Monitor {
    pub fn new(
        config: Config,
        probe: ConnectivityProbe,
        fetcher: SizeFetcher,
        store: ChangeStore,
        notifier: Notifier,
    ) -> Self {
        Self {
            config,
            probe,
            fetcher,
            store,
            notifier,
        }
    }

    /// Builds every service from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if one of the HTTP clients cannot be built.
    pub fn from_config(config: Config) -> Result<Self, Error> {
        let timeout = config.timeout();
        let probe = ConnectivityProbe::new(config.config.connectivity_url.clone(), timeout)?;
        let fetcher = SizeFetcher::new(timeout)?;
        let store = ChangeStore::open(config.config.storage_path.clone());
        let notifier = Notifier::new(timeout)?;

        Ok(Self::new(config, probe, fetcher, store, notifier))
    }

    pub fn store(&self) -> &ChangeStore {
        &self.store
    }

    /// Runs the check loop until `token` is cancelled, then shuts every lane
    /// down.
    ///
    /// The first check runs immediately. Checks never overlap: one that
    /// overruns the interval is followed right away by the next.
    pub async fn run(&self, token: CancellationToken) {
        let mut ticker = interval(self.config.check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = ticker.tick() => {},
                () = token.cancelled() => {
                    info!("Shutdown requested during sleep");
                    break;
                }
            }

            // In-flight requests are not aborted, only the wait on them
            select! {
                outcome = self.tick() => debug!("Check finished: {outcome:?}"),
                () = token.cancelled() => {
                    info!("Shutdown requested during a check");
                    break;
                }
            }
        }

        self.shutdown().await;
    }

    /// Runs one probe, fetch, diff and notify pass.
    pub async fn tick(&self) -> TickOutcome {
        match self.probe.check_available().await {
            Ok(true) => {}
            Ok(false) => {
                warn!("The network is not reachable, skipping this check");
                return TickOutcome::Offline;
            }
            Err(e) => {
                warn!("Failed to check network reachability ({e}), skipping this check");
                return TickOutcome::Offline;
            }
        }

        info!("Checking for document changes...");
        let urls = &self.config.sites.urls;

        // Everything is queued up front, the fetch lane runs them one by one
        let pending: Vec<_> = urls
            .iter()
            .map(|url| (url, self.fetcher.fetch_size(url)))
            .collect();

        let mut batch = ObservationBatch::with_capacity(urls.len());
        for (url, submitted) in pending {
            let fetched = match submitted {
                Ok(handle) => handle.join().await,
                Err(e) => Err(e),
            };

            match fetched {
                Ok(size) => {
                    debug!("{url}: {size}");
                    batch.push((url.clone(), size));
                }
                Err(e) => error!("Failed to retrieve the size of {url}: {e}"),
            }
        }

        let fetched = batch.len();
        info!("Retrieved the size of {fetched}/{} document(s)", urls.len());

        let changed = self.store.update(batch);
        if changed.is_empty() {
            return TickOutcome::Unchanged {
                fetched,
                total: urls.len(),
            };
        }

        info!("{} change(s) detected", changed.len());
        for url in &changed {
            info!("{url}: CHANGED");
        }
        self.dispatch(&changed);

        TickOutcome::Changed(changed)
    }

    fn dispatch(&self, changed: &ChangeSet) {
        let Some(webhook) = self.config.config.webhook_url.as_deref() else {
            warn!("Webhook is not set, no notification will be sent");
            return;
        };

        // Fire and forget, the notifier logs its own failures
        if let Err(e) = self
            .notifier
            .notify(webhook, self.config.role_id(), changed.clone())
        {
            error!("Failed to queue notification: {e}");
        }
    }

    async fn shutdown(&self) {
        self.probe.shutdown().await;
        self.fetcher.shutdown().await;
        self.notifier.shutdown().await;
        self.store.shutdown().await;
    }
}

/// Loads the configuration and monitors the configured documents until
/// `token` is cancelled.
///
/// If the configuration file is missing, a default one is written and the
/// function returns without monitoring anything.
pub async fn monitor_documents(token: CancellationToken) {
    let path = Config::path();
    let config = match Config::load(&path) {
        Ok(config) => config,
        Err(Error::ConfigMissing(path)) => {
            warn!(
                "No configuration found, a default one was written to {}",
                path.display()
            );
            info!("Please modify the configuration file and restart the program!");
            return;
        }
        Err(e) => {
            error!("Failed to load configuration from {}: {e}", path.display());
            return;
        }
    };

    log_configuration(&config);

    match Monitor::from_config(config) {
        Ok(monitor) => monitor.run(token).await,
        Err(e) => error!("Failed to start monitoring: {e}"),
    }

    info!("Goodbye!");
}

fn log_configuration(config: &Config) {
    info!("Starting document monitoring...");
    info!(
        "Check interval: {} ms",
        config.check_interval().as_millis()
    );
    info!("Timeout: {} seconds", config.timeout().as_secs());
    match (config.config.webhook_url.is_some(), config.role_id().is_some()) {
        (true, true) => {
            info!("Webhook is set, a notification will be sent on change");
            info!("Role ID is set, notifications will mention the role");
        }
        (true, false) => {
            info!("Webhook is set, a notification will be sent on change");
            info!("Role ID is not set, notifications will not mention anyone");
        }
        (false, _) => warn!("Webhook is not set, no notifications will be sent"),
    }
    info!(
        "Storing sizes in {}",
        config.config.storage_path.display()
    );
    info!("Monitoring {} documents", config.sites.urls.len());
}
