use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("notification display failed: {0}")]
    Display(String),
}

/// Structured push payload as delivered by the push service, with the
/// defaults applied when fields are omitted.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_body")]
    pub body: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default = "default_badge")]
    pub badge: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub actions: Vec<NotificationAction>,
    #[serde(default)]
    pub require_interaction: bool,
    #[serde(default)]
    pub silent: bool,
    #[serde(default = "default_vibrate")]
    pub vibrate: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(default)]
    pub icon: Option<String>,
}

fn default_title() -> String {
    "Notification".to_string()
}

fn default_body() -> String {
    "You have a new notification".to_string()
}

fn default_icon() -> String {
    "/icons/icon-192x192.png".to_string()
}

fn default_badge() -> String {
    "/icons/icon-72x72.png".to_string()
}

fn default_vibrate() -> Vec<u32> {
    vec![200, 100, 200]
}

impl PushPayload {
    pub fn from_json(data: &[u8]) -> Result<Self, PushError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Hosting-environment collaborator that puts a notification on screen.
#[async_trait]
pub trait NotificationPresenter: Send + Sync {
    async fn show(&self, payload: &PushPayload) -> Result<(), PushError>;
}

/// Pure pass-through: parse the payload, apply defaults, hand it to the
/// presenter. No cache interaction.
pub async fn present_push(
    data: &[u8],
    presenter: &dyn NotificationPresenter,
) -> Result<(), PushError> {
    let payload = PushPayload::from_json(data)?;
    presenter.show(&payload).await
}
