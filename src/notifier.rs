use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::crypto::mask_email;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShareNotification {
    pub recipient_email: String,
    pub recipient_name: String,
    pub guest_list_name: String,
    pub share_url: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RsvpInvite {
    pub recipient_email: String,
    pub recipient_name: String,
    pub guest_list_name: String,
    pub event_summary: String,
    pub rsvp_url: String,
    pub tracking_pixel_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RsvpConfirmation {
    pub recipient_email: String,
    pub recipient_name: String,
    pub guest_list_name: String,
    pub event_summary: String,
    pub bcc: Vec<String>,
    pub plus_one_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RsvpForward {
    pub recipient_email: String,
    pub recipient_name: String,
    pub forwarder_email: String,
    pub forwarder_name: Option<String>,
    pub guest_list_name: String,
    pub event_summary: String,
    pub rsvp_url: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlusOneNotification {
    pub organiser_email: String,
    pub guest_list_name: String,
    pub invitee_name: String,
    pub plus_one_name: Option<String>,
    pub plus_one_email: String,
}

/// Outbound message kinds carried through the job queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    ShareNotification(ShareNotification),
    RsvpInvite(RsvpInvite),
    RsvpConfirmation(RsvpConfirmation),
    RsvpForward(RsvpForward),
    PlusOne(PlusOneNotification),
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::ShareNotification(_) => "share_notification",
            Notification::RsvpInvite(_) => "rsvp_invite",
            Notification::RsvpConfirmation(_) => "rsvp_confirmation",
            Notification::RsvpForward(_) => "rsvp_forward",
            Notification::PlusOne(_) => "plus_one",
        }
    }

    pub async fn deliver(&self, notifier: &dyn Notifier) -> Result<()> {
        match self {
            Notification::ShareNotification(message) => {
                notifier.send_share_notification(message).await
            }
            Notification::RsvpInvite(message) => notifier.send_rsvp_invite(message).await,
            Notification::RsvpConfirmation(message) => {
                notifier.send_rsvp_confirmation(message).await
            }
            Notification::RsvpForward(message) => notifier.send_rsvp_forward(message).await,
            Notification::PlusOne(message) => notifier.send_plus_one_notification(message).await,
        }
    }
}

/// Email delivery boundary. Template rendering and transport live behind it.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send_otp(&self, email: &str, name: &str, code: &str) -> Result<()>;

    async fn send_share_notification(&self, message: &ShareNotification) -> Result<()>;

    async fn send_rsvp_invite(&self, message: &RsvpInvite) -> Result<()>;

    async fn send_rsvp_confirmation(&self, message: &RsvpConfirmation) -> Result<()>;

    async fn send_rsvp_forward(&self, message: &RsvpForward) -> Result<()>;

    async fn send_plus_one_notification(&self, message: &PlusOneNotification) -> Result<()>;
}

/// Writes a log line per message. Used when no relay is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_otp(&self, email: &str, _name: &str, _code: &str) -> Result<()> {
        info!(to = %mask_email(email), "verification code email (log only)");
        Ok(())
    }

    async fn send_share_notification(&self, message: &ShareNotification) -> Result<()> {
        info!(
            to = %mask_email(&message.recipient_email),
            guest_list = %message.guest_list_name,
            "share notification email (log only)"
        );
        Ok(())
    }

    async fn send_rsvp_invite(&self, message: &RsvpInvite) -> Result<()> {
        info!(
            to = %mask_email(&message.recipient_email),
            guest_list = %message.guest_list_name,
            "rsvp invite email (log only)"
        );
        Ok(())
    }

    async fn send_rsvp_confirmation(&self, message: &RsvpConfirmation) -> Result<()> {
        info!(
            to = %mask_email(&message.recipient_email),
            bcc = message.bcc.len(),
            "rsvp confirmation email (log only)"
        );
        Ok(())
    }

    async fn send_rsvp_forward(&self, message: &RsvpForward) -> Result<()> {
        info!(
            to = %mask_email(&message.recipient_email),
            cc = %mask_email(&message.forwarder_email),
            "rsvp forward email (log only)"
        );
        Ok(())
    }

    async fn send_plus_one_notification(&self, message: &PlusOneNotification) -> Result<()> {
        info!(
            to = %mask_email(&message.organiser_email),
            guest_list = %message.guest_list_name,
            "plus-one notification email (log only)"
        );
        Ok(())
    }
}

/// Posts each message as JSON to a mail relay, which renders and sends it.
pub struct HttpNotifier {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpNotifier {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build notifier HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    async fn post(&self, template: &str, payload: serde_json::Value) -> Result<()> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "template": template, "data": payload }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        request
            .send()
            .await
            .with_context(|| format!("failed to reach mail relay for {template}"))?
            .error_for_status()
            .with_context(|| format!("mail relay rejected {template}"))?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_otp(&self, email: &str, name: &str, code: &str) -> Result<()> {
        self.post(
            "share_otp",
            json!({ "to": email, "name": name, "code": code }),
        )
        .await
    }

    async fn send_share_notification(&self, message: &ShareNotification) -> Result<()> {
        self.post("share_notification", serde_json::to_value(message)?)
            .await
    }

    async fn send_rsvp_invite(&self, message: &RsvpInvite) -> Result<()> {
        self.post("rsvp_invite", serde_json::to_value(message)?).await
    }

    async fn send_rsvp_confirmation(&self, message: &RsvpConfirmation) -> Result<()> {
        self.post("rsvp_confirmation", serde_json::to_value(message)?)
            .await
    }

    async fn send_rsvp_forward(&self, message: &RsvpForward) -> Result<()> {
        self.post("rsvp_forward", serde_json::to_value(message)?).await
    }

    async fn send_plus_one_notification(&self, message: &PlusOneNotification) -> Result<()> {
        self.post("plus_one_notification", serde_json::to_value(message)?)
            .await
    }
}

/// Relay-backed notifier when `NOTIFIER_URL` is set, log-only otherwise.
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn Notifier>> {
    match &config.notifier_url {
        Some(url) => {
            info!(endpoint = %url, "delivering notifications through mail relay");
            Ok(Arc::new(HttpNotifier::new(
                url.clone(),
                config.notifier_api_key.clone(),
            )?))
        }
        None => {
            warn!("NOTIFIER_URL not set, notifications will only be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

const OTP_DELIVERY_ATTEMPTS: u32 = 3;

/// Sends a verification code off the request path. Codes are never persisted,
/// so this retries in-process instead of going through the job queue.
pub fn spawn_otp_delivery(
    notifier: Arc<dyn Notifier>,
    email: String,
    name: String,
    code: String,
) {
    tokio::spawn(async move {
        let mut delay = Duration::from_millis(500);
        for attempt in 1..=OTP_DELIVERY_ATTEMPTS {
            match notifier.send_otp(&email, &name, &code).await {
                Ok(()) => return,
                Err(err) if attempt < OTP_DELIVERY_ATTEMPTS => {
                    warn!(
                        attempt,
                        error = %err,
                        to = %mask_email(&email),
                        "verification email failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => {
                    warn!(
                        attempt,
                        error = %err,
                        to = %mask_email(&email),
                        "verification email failed, giving up"
                    );
                }
            }
        }
    });
}
