use wakecue::WakeConfig;
use wakecue::arbiter::SpeechPayload;
use wakecue::scheduler::compute_next_fire;

use chrono::{TimeZone, Utc};

const SAMPLE: &str = r#"
[arbiter]
cooldown_ms = 1500

[scheduler]
snooze_minutes = 9

[[reminders]]
id = "workday"
time = "6:45"
weekdays = [1, 2, 3, 4, 5]
text = "Time to get up"
voice_profile = "Sam"

[[reminders]]
id = "weekend"
time = "09:30"
weekdays = [0, 6]
file = "/usr/share/wakecue/chime.wav"
"#;

#[test]
fn reminders_load_from_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, SAMPLE).unwrap();

    let config = WakeConfig::from_file(&path).unwrap();
    assert_eq!(config.arbiter.cooldown_ms, 1500);
    assert_eq!(config.arbiter.session_expiry_secs, 120);
    assert_eq!(config.scheduler.snooze_minutes, 9);

    let reminders = config.reminders().unwrap();
    assert_eq!(reminders.len(), 2);
    assert_eq!(reminders[0].voice_profile, "Sam");
    assert!(matches!(reminders[1].payload, SpeechPayload::File(_)));

    // Saturday morning: the workday reminder waits for Monday.
    let saturday = Utc.with_ymd_and_hms(2026, 3, 7, 8, 0, 0).single().unwrap();
    let next = compute_next_fire(&reminders[0].spec, &saturday);
    let monday = Utc.with_ymd_and_hms(2026, 3, 9, 6, 45, 0).single().unwrap();
    assert_eq!(next.next_fire_epoch_millis, monday.timestamp_millis());

    let next = compute_next_fire(&reminders[1].spec, &saturday);
    let later_today = Utc.with_ymd_and_hms(2026, 3, 7, 9, 30, 0).single().unwrap();
    assert_eq!(next.next_fire_epoch_millis, later_today.timestamp_millis());
    assert!(!next.is_tomorrow_or_later);
}

#[test]
fn invalid_reminder_is_reported() {
    let bad = r#"
[[reminders]]
id = "broken"
time = "25:00"
text = "never"
"#;
    let config: WakeConfig = toml::from_str(bad).unwrap();
    let err = config.reminders().unwrap_err().to_string();
    assert!(err.contains("broken"), "unexpected error: {err}");
}
