use std::fmt;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::pattern::RepeatPattern;

// =============================================================================
// Identifiers and references
// =============================================================================

/// Identifier of an alarm or reminder, e.g. `alarm_1` or `take_pills`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A media-rendering device, e.g. `media_player.bedroom`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceRef(String);

impl DeviceRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A switchable entity turned on when an item fires, e.g. `light.bedroom`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityRef(String);

impl EntityRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A phone or other notification target, e.g. `mobile_app_pixel`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotifyTarget(String);

impl NotifyTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Notify service name: `notify.mobile_app_x` and `x` both become
    /// `mobile_app_x`.
    pub fn service(&self) -> String {
        let id = self.0.trim();
        let id = id.strip_prefix("notify.").unwrap_or(id);
        if id.starts_with("mobile_app_") {
            id.to_string()
        } else {
            format!("mobile_app_{}", id)
        }
    }
}

impl fmt::Display for NotifyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A playable media location (URL, local path or provider URI).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaRef(String);

impl MediaRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Enums
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Alarm,
    Reminder,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::Alarm => write!(f, "alarm"),
            ItemKind::Reminder => write!(f, "reminder"),
        }
    }
}

impl std::str::FromStr for ItemKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alarm" | "alarms" => Ok(ItemKind::Alarm),
            "reminder" | "reminders" => Ok(ItemKind::Reminder),
            _ => Err(format!("Unknown item kind: {}", s)),
        }
    }
}

/// Lifecycle status of an item as shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Armed and waiting for its next fire.
    Scheduled,
    /// A playback session is running.
    Active,
    /// Deferred by a snooze.
    Snoozed,
    /// One-shot item that already fired or whose instant passed.
    Expired,
    /// Fire was overdue past the grace window and was not played.
    Missed,
    Disabled,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Scheduled => write!(f, "scheduled"),
            ItemStatus::Active => write!(f, "active"),
            ItemStatus::Snoozed => write!(f, "snoozed"),
            ItemStatus::Expired => write!(f, "expired"),
            ItemStatus::Missed => write!(f, "missed"),
            ItemStatus::Disabled => write!(f, "disabled"),
        }
    }
}

/// Backend family of a media device. Drives capability checks and
/// stop-detection quirks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    #[default]
    Generic,
    MusicAssistant,
    /// Media-only: no text-to-speech, reports track end as a pause.
    Spotify,
}

impl DeviceFamily {
    pub fn supports_speech(self) -> bool {
        !matches!(self, DeviceFamily::Spotify)
    }

    pub fn pauses_at_track_end(self) -> bool {
        matches!(self, DeviceFamily::Spotify)
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFamily::Generic => write!(f, "generic"),
            DeviceFamily::MusicAssistant => write!(f, "music_assistant"),
            DeviceFamily::Spotify => write!(f, "spotify"),
        }
    }
}

// =============================================================================
// Announcement configuration
// =============================================================================

/// One step of an announcement sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnnouncementStep {
    /// Speaks the cycle number from the second cycle on.
    LoopCount,
    Name,
    Time,
    Message { text: String },
    /// Plays media; `None` falls back to the configured default sound.
    Media {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media: Option<MediaRef>,
    },
}

impl AnnouncementStep {
    pub fn is_media(&self) -> bool {
        matches!(self, AnnouncementStep::Media { .. })
    }

    pub fn is_spoken(&self) -> bool {
        !self.is_media()
    }
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    pub step: AnnouncementStep,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl StepConfig {
    pub fn enabled(step: AnnouncementStep) -> Self {
        Self { step, enabled: true }
    }
}

/// Ordered announcement sequence of an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Announcement {
    pub steps: Vec<StepConfig>,
}

impl Announcement {
    pub fn new(steps: Vec<AnnouncementStep>) -> Self {
        Self {
            steps: steps.into_iter().map(StepConfig::enabled).collect(),
        }
    }

    /// Default sequence: name, time, optional message, media.
    pub fn standard(message: Option<&str>) -> Self {
        let mut steps = vec![AnnouncementStep::Name, AnnouncementStep::Time];
        if let Some(text) = message.filter(|m| !m.trim().is_empty()) {
            steps.push(AnnouncementStep::Message {
                text: text.to_string(),
            });
        }
        steps.push(AnnouncementStep::Media { media: None });
        Self::new(steps)
    }

    pub fn enabled_steps(&self) -> Vec<AnnouncementStep> {
        self.steps
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.step.clone())
            .collect()
    }

    pub fn has_media(&self) -> bool {
        self.steps.iter().any(|s| s.enabled && s.step.is_media())
    }

    pub fn has_spoken(&self) -> bool {
        self.steps.iter().any(|s| s.enabled && s.step.is_spoken())
    }

    pub fn message(&self) -> Option<&str> {
        self.steps.iter().find_map(|s| match &s.step {
            AnnouncementStep::Message { text } => Some(text.as_str()),
            _ => None,
        })
    }
}

// =============================================================================
// Items
// =============================================================================

/// An alarm or reminder with its schedule and mutable runtime state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmItem {
    pub id: ItemId,
    pub kind: ItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub pattern: RepeatPattern,
    pub time_of_day: NaiveTime,
    pub timezone: Tz,
    pub enabled: bool,
    pub device: DeviceRef,
    pub announcement: Announcement,
    #[serde(default)]
    pub activation_entities: Vec<EntityRef>,
    /// Playback volume in `0.0..=1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    /// Sent a notification with stop and snooze actions on every fire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<NotifyTarget>,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub last_fired: Option<DateTime<Utc>>,
    pub next_fire: Option<DateTime<Utc>>,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
}

impl AlarmItem {
    /// When the scheduler should next fire this item. A pending snooze
    /// takes precedence over the pattern.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        if !self.enabled {
            return None;
        }
        self.snoozed_until.or(self.next_fire)
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => match self.kind {
                ItemKind::Alarm => "Alarm".to_string(),
                ItemKind::Reminder => "Reminder".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_item() -> AlarmItem {
        AlarmItem {
            id: ItemId::new("alarm_1"),
            kind: ItemKind::Alarm,
            name: None,
            pattern: RepeatPattern::Daily,
            time_of_day: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            timezone: Tz::UTC,
            enabled: true,
            device: DeviceRef::new("media_player.bedroom"),
            announcement: Announcement::standard(Some("Rise and shine")),
            activation_entities: vec![EntityRef::new("light.bedroom")],
            volume: None,
            notify: None,
            snoozed_until: None,
            last_fired: None,
            next_fire: Some(Utc.with_ymd_and_hms(2024, 1, 15, 7, 0, 0).unwrap()),
            status: ItemStatus::Scheduled,
            created_at: Utc.with_ymd_and_hms(2024, 1, 14, 20, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_item_kind_display_and_parse() {
        assert_eq!(ItemKind::Alarm.to_string(), "alarm");
        assert_eq!("reminders".parse::<ItemKind>().unwrap(), ItemKind::Reminder);
        assert!("timer".parse::<ItemKind>().is_err());
    }

    #[test]
    fn test_due_at_prefers_snooze() {
        let mut item = sample_item();
        assert_eq!(item.due_at(), item.next_fire);

        let snooze = Utc.with_ymd_and_hms(2024, 1, 15, 7, 10, 0).unwrap();
        item.snoozed_until = Some(snooze);
        assert_eq!(item.due_at(), Some(snooze));

        item.enabled = false;
        assert_eq!(item.due_at(), None);
    }

    #[test]
    fn test_display_name_defaults_by_kind() {
        let mut item = sample_item();
        assert_eq!(item.display_name(), "Alarm");
        item.name = Some("Gym".to_string());
        assert_eq!(item.display_name(), "Gym");
    }

    #[test]
    fn test_standard_announcement_order() {
        let announcement = Announcement::standard(Some("Take the bins out"));
        let steps = announcement.enabled_steps();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0], AnnouncementStep::Name);
        assert!(steps[3].is_media());
        assert_eq!(announcement.message(), Some("Take the bins out"));
    }

    #[test]
    fn test_disabled_steps_are_skipped() {
        let mut announcement = Announcement::standard(None);
        announcement.steps[2].enabled = false;
        assert!(!announcement.has_media());
        assert!(announcement.has_spoken());
        assert_eq!(announcement.enabled_steps().len(), 2);
    }

    #[test]
    fn test_device_family_capabilities() {
        assert!(DeviceFamily::Generic.supports_speech());
        assert!(DeviceFamily::MusicAssistant.supports_speech());
        assert!(!DeviceFamily::Spotify.supports_speech());
        assert!(DeviceFamily::Spotify.pauses_at_track_end());
    }

    #[test]
    fn test_item_json_roundtrip_keeps_timezone() {
        let mut item = sample_item();
        item.timezone = "Europe/Paris".parse().unwrap();
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("\"Europe/Paris\""));
        let back: AlarmItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_step_enabled_defaults_to_true() {
        let step: StepConfig = serde_json::from_str(r#"{"step":{"kind":"name"}}"#).unwrap();
        assert!(step.enabled);
        assert_eq!(step.step, AnnouncementStep::Name);
    }

    #[test]
    fn test_notify_target_service_name() {
        for raw in ["notify.mobile_app_pixel", "mobile_app_pixel", " pixel "] {
            assert_eq!(NotifyTarget::new(raw).service(), "mobile_app_pixel");
        }
        let item: AlarmItem = serde_json::from_str(&serde_json::to_string(&sample_item()).unwrap()).unwrap();
        assert_eq!(item.notify, None);
        assert!(!serde_json::to_string(&item).unwrap().contains("notify"));
    }
}
