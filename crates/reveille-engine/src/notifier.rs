//! Fire notifications.
//!
//! An item with a `notify` target gets a notification with Stop and Snooze
//! actions each time it fires. Delivery runs beside the session and never
//! holds it up; the actions come back through `AlarmService::notification_action`.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use reveille_core::types::{AlarmItem, ItemId, NotifyTarget};

use crate::announcement::time_text;
use crate::error::DeviceCommandError;

/// Action button on a fire notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    Stop,
    Snooze,
}

impl NotificationAction {
    pub fn title(self) -> &'static str {
        match self {
            NotificationAction::Stop => "Stop",
            NotificationAction::Snooze => "Snooze",
        }
    }
}

impl fmt::Display for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationAction::Stop => write!(f, "stop"),
            NotificationAction::Snooze => write!(f, "snooze"),
        }
    }
}

impl FromStr for NotificationAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stop" => Ok(NotificationAction::Stop),
            "snooze" => Ok(NotificationAction::Snooze),
            other => Err(format!("unknown notification action: {}", other)),
        }
    }
}

/// What gets sent when an item fires. `tag` carries the item id so the
/// action can be routed back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub tag: ItemId,
    pub title: String,
    pub message: String,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    pub fn for_fire(item: &AlarmItem, now: DateTime<Utc>) -> Self {
        let message = item
            .announcement
            .message()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| time_text(item, now));
        Self {
            tag: item.id.clone(),
            title: item.display_name(),
            message,
            actions: vec![NotificationAction::Stop, NotificationAction::Snooze],
        }
    }
}

/// Delivers fire notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        target: &NotifyTarget,
        notification: &Notification,
    ) -> Result<(), DeviceCommandError>;
}

/// Notifier that only writes the notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(
        &self,
        target: &NotifyTarget,
        notification: &Notification,
    ) -> Result<(), DeviceCommandError> {
        info!(
            service = %target.service(),
            item_id = %notification.tag,
            title = %notification.title,
            "Notification sent"
        );
        Ok(())
    }
}
