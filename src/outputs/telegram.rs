//! Delivery over the Telegram Bot API.
//!
//! [`TelegramClient`] speaks the HTTP API. [`TelegramBot`] long-polls for
//! commands and answers `/events` with the fairly selected upcoming records,
//! one photo or text message per record.

use chrono::Local;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Span, debug, error, info, info_span, instrument, warn};

use super::caption::format_caption;
use super::selection::select_for_delivery;
use crate::error::DeliveryError;
use crate::models::{CanonicalEvent, EventFilter};
use crate::storage::EventStore;
use crate::utils::truncate_for_log;

pub const NO_EVENTS_MESSAGE: &str = "No upcoming events found right now. Try again later!";
pub const EVENTS_ERROR_MESSAGE: &str = "An error occurred while fetching events.";

const HELP_TEXT: &str = "Here's what I can do:\n\
                         📅 /events - Show upcoming events.\n\
                         ℹ️ /help - Show this help message.";

const API_BASE: &str = "https://api.telegram.org";
const POLL_TIMEOUT_SECS: u64 = 30;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Sends one delivery unit to a chat.
pub trait DeliveryTransport {
    async fn send_photo(&self, chat_id: i64, photo_url: &str, caption: &str) -> Result<(), DeliveryError>;
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError>;
}

/// Yields inbound updates after `offset`.
pub trait UpdateSource {
    async fn poll(&self, offset: i64) -> Result<Vec<Update>, DeliveryError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendPhoto<'a> {
    chat_id: i64,
    photo: &'a str,
    caption: &'a str,
    parse_mode: &'static str,
}

/// HTTP client for the Bot API.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

impl fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramClient")
            .field("base_url", &format!("{API_BASE}/bot<redacted>"))
            .finish()
    }
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self, DeliveryError> {
        Self::with_base(API_BASE, token)
    }

    pub fn with_base(api_base: &str, token: &str) -> Result<Self, DeliveryError> {
        if token.trim().is_empty() {
            return Err(DeliveryError::Rejected("empty bot token".to_string()));
        }
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: format!("{}/bot{}", api_base.trim_end_matches('/'), token.trim()),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<T, DeliveryError> {
        let response = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        let parsed: ApiResponse<T> = serde_json::from_str(&text).map_err(|e| {
            DeliveryError::Rejected(format!(
                "{method}: HTTP {status}, undecodable body ({e}): {}",
                truncate_for_log(&text, 200)
            ))
        })?;
        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(DeliveryError::Rejected(format!(
                "{method}: HTTP {status}: {}",
                parsed.description.unwrap_or_else(|| "no description".to_string())
            ))),
        }
    }
}

impl DeliveryTransport for TelegramClient {
    async fn send_photo(&self, chat_id: i64, photo_url: &str, caption: &str) -> Result<(), DeliveryError> {
        let body = serde_json::to_value(SendPhoto {
            chat_id,
            photo: photo_url,
            caption,
            parse_mode: "HTML",
        })
        .map_err(|e| DeliveryError::Rejected(e.to_string()))?;
        self.call::<serde_json::Value>("sendPhoto", &body, REQUEST_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "link_preview_options": { "is_disabled": true },
        });
        self.call::<serde_json::Value>("sendMessage", &body, REQUEST_TIMEOUT)
            .await
            .map(|_| ())
    }
}

impl UpdateSource for TelegramClient {
    async fn poll(&self, offset: i64) -> Result<Vec<Update>, DeliveryError> {
        let body = json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message"],
        });
        self.call(
            "getUpdates",
            &body,
            REQUEST_TIMEOUT + Duration::from_secs(POLL_TIMEOUT_SECS),
        )
        .await
    }
}

/// Outcome of sending a batch of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
}

/// Send each record as its own unit, continuing past failures.
pub async fn deliver_events<T: DeliveryTransport>(
    transport: &T,
    chat_id: i64,
    events: &[CanonicalEvent],
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for event in events {
        let caption = format_caption(event);
        let result = match &event.image_url {
            Some(image) => transport.send_photo(chat_id, image, &caption).await,
            None => transport.send_text(chat_id, &caption).await,
        };
        match result {
            Ok(()) => report.sent += 1,
            Err(e) => {
                error!(chat_id, id = %event.id, title = %event.title, error = %e, "Failed to send event");
                report.failed += 1;
            }
        }
    }
    report
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Help,
    Events,
}

/// `/events`, `/events@SomeBot` and `/events extra` all name `/events`.
fn parse_command(text: &str) -> Option<Command> {
    let word = text.split_whitespace().next()?;
    let name = word.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);
    match name.to_ascii_lowercase().as_str() {
        "start" => Some(Command::Start),
        "help" => Some(Command::Help),
        "events" => Some(Command::Events),
        _ => None,
    }
}

pub struct TelegramBot<T> {
    transport: T,
    store: Arc<EventStore>,
    per_source_cap: usize,
    span: Span,
}

impl<T: DeliveryTransport> TelegramBot<T> {
    pub fn new(transport: T, store: Arc<EventStore>, per_source_cap: usize) -> Self {
        let span = info_span!("bot", per_source_cap);
        Self {
            transport,
            store,
            per_source_cap,
            span,
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.transport.send_text(chat_id, text).await {
            warn!(chat_id, error = %e, "Failed to send reply");
        }
    }

    #[instrument(parent = &self.span, level = "info", skip_all, fields(update_id = update.update_id))]
    pub async fn handle_update(&self, update: &Update) {
        let Some(message) = &update.message else {
            return;
        };
        let Some(command) = message.text.as_deref().and_then(parse_command) else {
            debug!("Ignoring non-command message");
            return;
        };
        let chat_id = message.chat.id;
        let user = message
            .from
            .as_ref()
            .map(|u| u.username.clone().unwrap_or_else(|| u.first_name.clone()))
            .unwrap_or_default();
        info!(chat_id, %user, ?command, "Handling command");

        match command {
            Command::Start => {
                let name = message
                    .from
                    .as_ref()
                    .map(|u| u.first_name.as_str())
                    .unwrap_or("there");
                let greeting = format!("Hi {}! 👋", html_escape::encode_text(name));
                self.reply(chat_id, &greeting).await;
                self.reply(chat_id, HELP_TEXT).await;
            }
            Command::Help => self.reply(chat_id, HELP_TEXT).await,
            Command::Events => self.handle_events_command(chat_id).await,
        }
    }

    /// Query upcoming records, select fairly, and send them.
    pub async fn handle_events_command(&self, chat_id: i64) {
        let filter = EventFilter::upcoming_from(Local::now().date_naive());
        let events = self.store.query(Some(&filter)).await;
        if events.is_empty() {
            self.reply(chat_id, NO_EVENTS_MESSAGE).await;
            return;
        }

        let found = events.len();
        let selected = select_for_delivery(events, self.per_source_cap);
        info!(chat_id, found, selected = selected.len(), "Sending upcoming events");

        let report = deliver_events(&self.transport, chat_id, &selected).await;
        info!(chat_id, sent = report.sent, failed = report.failed, "Delivery finished");
        if report.sent == 0 && report.failed > 0 {
            self.reply(chat_id, EVENTS_ERROR_MESSAGE).await;
        }
    }
}

impl<T: DeliveryTransport + UpdateSource> TelegramBot<T> {
    /// Long-poll for updates until the process stops.
    ///
    /// Each batch of updates is handled concurrently; poll failures are
    /// logged and retried after a pause.
    pub async fn run(&self) {
        self.span.in_scope(|| info!("Bot polling started"));
        let mut offset = 0;
        loop {
            match self.transport.poll(offset).await {
                Ok(updates) => {
                    if let Some(last) = updates.iter().map(|u| u.update_id).max() {
                        offset = last + 1;
                    }
                    join_all(updates.iter().map(|u| self.handle_update(u))).await;
                }
                Err(e) => {
                    self.span
                        .in_scope(|| warn!(error = %e, "Polling for updates failed; retrying"));
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                }
            }
        }
    }
}
