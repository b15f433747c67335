//! Announcement rendering and item naming.

use chrono::{DateTime, Utc};

use reveille_core::config::PlaybackConfig;
use reveille_core::types::{AlarmItem, AnnouncementStep, DeviceFamily, ItemKind, MediaRef};

/// What the session does for one announcement step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    Speak(String),
    Play(MediaRef),
    Skip,
}

impl StepAction {
    pub fn is_play(&self) -> bool {
        matches!(self, StepAction::Play(_))
    }
}

/// Turn a step into a device action for the given cycle (0-based).
pub fn plan_step(
    step: &AnnouncementStep,
    item: &AlarmItem,
    family: DeviceFamily,
    cycle: u32,
    now: DateTime<Utc>,
    playback: &PlaybackConfig,
) -> StepAction {
    if step.is_spoken() && !family.supports_speech() {
        return StepAction::Skip;
    }
    match step {
        AnnouncementStep::LoopCount if cycle == 0 => StepAction::Skip,
        AnnouncementStep::LoopCount => StepAction::Speak(format!("Repeat {}.", cycle + 1)),
        AnnouncementStep::Name => StepAction::Speak(name_text(item)),
        AnnouncementStep::Time => StepAction::Speak(time_text(item, now)),
        AnnouncementStep::Message { text } if text.trim().is_empty() => StepAction::Skip,
        AnnouncementStep::Message { text } => StepAction::Speak(text.trim().to_string()),
        AnnouncementStep::Media { media } => StepAction::Play(
            media
                .clone()
                .unwrap_or_else(|| default_media(item.kind, playback)),
        ),
    }
}

pub fn default_media(kind: ItemKind, playback: &PlaybackConfig) -> MediaRef {
    match kind {
        ItemKind::Alarm => playback.default_alarm_media.clone(),
        ItemKind::Reminder => playback.default_reminder_media.clone(),
    }
}

pub fn name_text(item: &AlarmItem) -> String {
    let name = item.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    match (item.kind, name) {
        (ItemKind::Alarm, Some(name)) => format!("{} alarm.", capitalize(name)),
        (ItemKind::Alarm, None) => "Alarm.".to_string(),
        (ItemKind::Reminder, Some(name)) => format!("Time to {}.", name),
        (ItemKind::Reminder, None) => "Reminder.".to_string(),
    }
}

/// "It's 7:05 AM." in the item's zone.
pub fn time_text(item: &AlarmItem, now: DateTime<Utc>) -> String {
    let local = now.with_timezone(&item.timezone);
    format!("It's {}.", local.format("%-I:%M %p"))
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Lowercase id fragment: runs of anything but ASCII letters and digits
/// collapse to one underscore.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use chrono_tz::Tz;
    use reveille_core::pattern::RepeatPattern;
    use reveille_core::types::{Announcement, DeviceRef, ItemId, ItemStatus};

    fn item(kind: ItemKind, name: Option<&str>) -> AlarmItem {
        AlarmItem {
            id: ItemId::new("x"),
            kind,
            name: name.map(str::to_string),
            pattern: RepeatPattern::Daily,
            time_of_day: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            timezone: "America/New_York".parse::<Tz>().unwrap(),
            enabled: true,
            device: DeviceRef::new("media_player.bedroom"),
            announcement: Announcement::standard(None),
            activation_entities: vec![],
            volume: None,
            notify: None,
            snoozed_until: None,
            last_fired: None,
            next_fire: None,
            status: ItemStatus::Scheduled,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_name_text() {
        assert_eq!(name_text(&item(ItemKind::Alarm, Some("wake up"))), "Wake up alarm.");
        assert_eq!(name_text(&item(ItemKind::Alarm, None)), "Alarm.");
        assert_eq!(
            name_text(&item(ItemKind::Reminder, Some("take pills"))),
            "Time to take pills."
        );
    }

    #[test]
    fn test_time_text_uses_item_zone() {
        // 12:05 UTC is 07:05 in New York in January.
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 5, 0).unwrap();
        assert_eq!(time_text(&item(ItemKind::Alarm, None), now), "It's 7:05 AM.");

        let now = Utc.with_ymd_and_hms(2024, 1, 15, 23, 30, 0).unwrap();
        assert_eq!(time_text(&item(ItemKind::Alarm, None), now), "It's 6:30 PM.");
    }

    #[test]
    fn test_loop_count_only_from_second_cycle() {
        let it = item(ItemKind::Alarm, None);
        let cfg = PlaybackConfig::default();
        let now = Utc::now();
        let step = AnnouncementStep::LoopCount;
        assert_eq!(plan_step(&step, &it, DeviceFamily::Generic, 0, now, &cfg), StepAction::Skip);
        assert_eq!(
            plan_step(&step, &it, DeviceFamily::Generic, 1, now, &cfg),
            StepAction::Speak("Repeat 2.".to_string())
        );
    }

    #[test]
    fn test_media_defaults_by_kind() {
        let cfg = PlaybackConfig::default();
        let step = AnnouncementStep::Media { media: None };
        let now = Utc::now();
        assert_eq!(
            plan_step(&step, &item(ItemKind::Alarm, None), DeviceFamily::Generic, 0, now, &cfg),
            StepAction::Play(cfg.default_alarm_media.clone())
        );
        assert_eq!(
            plan_step(&step, &item(ItemKind::Reminder, Some("x")), DeviceFamily::Generic, 0, now, &cfg),
            StepAction::Play(cfg.default_reminder_media.clone())
        );

        let custom = AnnouncementStep::Media {
            media: Some(MediaRef::new("spotify:track:123")),
        };
        assert_eq!(
            plan_step(&custom, &item(ItemKind::Alarm, None), DeviceFamily::Spotify, 0, now, &cfg),
            StepAction::Play(MediaRef::new("spotify:track:123"))
        );
    }

    #[test]
    fn test_spoken_steps_skipped_on_media_only_device() {
        let cfg = PlaybackConfig::default();
        let it = item(ItemKind::Alarm, Some("gym"));
        assert_eq!(
            plan_step(&AnnouncementStep::Name, &it, DeviceFamily::Spotify, 0, Utc::now(), &cfg),
            StepAction::Skip
        );
    }

    #[test]
    fn test_blank_message_is_skipped() {
        let cfg = PlaybackConfig::default();
        let step = AnnouncementStep::Message {
            text: "   ".to_string(),
        };
        let it = item(ItemKind::Alarm, None);
        assert_eq!(
            plan_step(&step, &it, DeviceFamily::Generic, 0, Utc::now(), &cfg),
            StepAction::Skip
        );
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Take Pills"), "take_pills");
        assert_eq!(slugify("  Gym -- 6am! "), "gym_6am");
        assert_eq!(slugify("Café time"), "caf_time");
        assert_eq!(slugify("!!!"), "");
    }
}
