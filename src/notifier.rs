use log::{error, info};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::error::Error;
use crate::lane::{Lane, LaneHandle};

const EMBED_TITLE: &str = "Document(s) Updated!";
const EMBED_COLOR: u32 = 0x0099_EEFF;

#[derive(Debug, Serialize)]
pub(crate) struct DiscordMessage {
    content: String,
    tts: bool,
    embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: &'static str,
    color: u32,
    description: String,
}

/// Posts change notifications to a Discord webhook on its own lane.
pub struct Notifier {
    client: Client,
    lane: Lane,
}

impl Notifier {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        Ok(Self {
            client: crate::http_client(timeout)?,
            lane: Lane::new("notify"),
        })
    }

    /// Queues a notification listing `changed` documents.
    ///
    /// Delivery failures are logged when they happen and are never retried.
    /// The returned handle can be dropped; it only exists for callers that
    /// want to know how delivery went.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LaneClosed`] if the notifier has been shut down.
    pub fn notify(
        &self,
        webhook_url: &str,
        role_id: Option<&str>,
        changed: Vec<String>,
    ) -> Result<LaneHandle<()>, Error> {
        let client = self.client.clone();
        let webhook_url = webhook_url.to_string();
        let role_id = role_id.map(str::to_string);

        self.lane.submit(move || async move {
            let payload = build_message(role_id.as_deref(), &changed);
            let result = send_discord_notification(&client, &webhook_url, &payload).await;

            match &result {
                Ok(()) => info!("Notified the webhook about {} change(s)", changed.len()),
                Err(e) => error!("Failed to notify the webhook: {e}"),
            }
            result
        })
    }

    pub async fn shutdown(&self) {
        self.lane.shutdown().await;
    }
}

pub(crate) fn build_message(role_id: Option<&str>, changed: &[String]) -> DiscordMessage {
    // If role_id is None, we don't want to mention anyone
    let content = role_id.map_or(String::new(), |id| format!("<@&{id}>"));

    let mut description = String::from("The following document(s) have been updated:");
    for url in changed {
        description.push_str("\n - ");
        description.push_str(url);
    }

    DiscordMessage {
        content,
        tts: false,
        embeds: vec![DiscordEmbed {
            title: EMBED_TITLE,
            color: EMBED_COLOR,
            description,
        }],
    }
}

async fn send_discord_notification(
    client: &Client,
    webhook_url: &str,
    payload: &DiscordMessage,
) -> Result<(), Error> {
    client
        .post(webhook_url)
        .json(payload)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(Error::NotificationFailed)?;
    Ok(())
}
