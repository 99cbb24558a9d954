use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument};

use super::message::{self, series_name, status_name, sub_status_description};
use super::{Alert, AlertKind, Notifier, NotifyError, with_retry};
use crate::config::Discord;

const RED: u32 = 15158332;
const GREEN: u32 = 3066993;
const ORANGE: u32 = 15105570;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

fn field(name: &str, value: impl ToString, inline: bool) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value: value.to_string(),
        inline,
    }
}

/// Posts alerts as embeds to a Discord webhook.
#[derive(Debug, Clone)]
pub struct DiscordNotifier {
    client: Client,
    discord: Discord,
    retries: u32,
    backoff: Duration,
}

impl DiscordNotifier {
    pub fn new(discord: Discord, timeout: Duration, retries: u32) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            discord,
            retries,
            backoff: Duration::from_secs(1),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn build_embed(alert: &Alert) -> Embed {
        let series = series_name(alert);
        let (description, color) = match alert.kind {
            AlertKind::Down => (format!("**{series}** stopped responding correctly"), RED),
            AlertKind::ContinuousDown => (
                format!(
                    "**{series}** has failed {} checks in a row",
                    alert.failure_count
                ),
                ORANGE,
            ),
            AlertKind::Up => (format!("**{series}** is back up"), GREEN),
        };

        let mut fields = vec![
            field("Provider", &alert.key.provider, true),
            field("Service", &alert.key.service, true),
            field(
                "Status",
                format!(
                    "{} → {}",
                    status_name(alert.previous),
                    status_name(alert.current)
                ),
                false,
            ),
        ];
        if !alert.key.channel.is_empty() {
            fields.insert(2, field("Channel", &alert.key.channel, true));
        }
        if let Some(reason) = sub_status_description(alert.sub_status) {
            fields.push(field("Reason", reason, true));
        }
        if alert.current.is_up() {
            fields.push(field("Latency", format!("{} ms", alert.latency_ms), true));
        }

        Embed {
            title: Some(message::title(alert.kind).to_string()),
            description: Some(description),
            color: Some(color),
            fields,
            footer: Some(EmbedFooter {
                text: format!("{} | {}", series, alert.kind),
            }),
            timestamp: DateTime::<Utc>::from_timestamp(alert.timestamp, 0).map(|t| t.to_rfc3339()),
        }
    }

    pub fn build_message(&self, alert: &Alert) -> Message {
        let mut builder = MessageBuilder::new().add_embed(Self::build_embed(alert));
        if let Some(user_id) = &self.discord.user_id {
            builder = builder.content(format!("`{}` <@{user_id}>", series_name(alert)));
        }
        builder.build()
    }

    async fn post(&self, message: &Message) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.discord.url)
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    fn name(&self) -> &str {
        "discord"
    }

    #[instrument(skip_all, fields(key = %alert.key, kind = %alert.kind))]
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let message = self.build_message(alert);
        with_retry(self.retries, self.backoff, || self.post(&message)).await?;
        debug!("discord message delivered");
        Ok(())
    }
}
