//! Trigger runner -> dispatcher -> arbiter, driven with fixed clocks.

use chrono::{FixedOffset, TimeZone, Utc};
use tokio::sync::mpsc;
use wakecue::arbiter::{Phase, SessionDecision, SessionSource, SpeechPayload};
use wakecue::scheduler::{FireLedger, TriggerRunner, TriggerSpec};
use wakecue::{DispatchOutcome, Reminder, WakeDispatcher};

use crate::helpers::{no_cooldown, scripted_arbiter, wait_for_phase};

fn reminder(id: &str, time: &str, days: &[u8], text: &str) -> Reminder {
    Reminder {
        spec: TriggerSpec::parse(id, time, days).unwrap(),
        payload: SpeechPayload::Text(text.to_owned()),
        voice_profile: "Sam".to_owned(),
    }
}

#[test]
fn weekday_trigger_fires_and_speaks() {
    let (arbiter, backend, _rt) = scripted_arbiter(no_cooldown());
    let dispatcher = WakeDispatcher::new(arbiter.clone(), 5);
    let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
    let (mut runner, _handle) = TriggerRunner::new(fired_tx);

    // Friday 2026-03-06 08:00 +01:00; the trigger is Mon/Wed 07:00.
    let tz = FixedOffset::east_opt(3600).unwrap();
    let friday = tz.with_ymd_and_hms(2026, 3, 6, 8, 0, 0).single().unwrap();
    let wake = reminder("workday", "07:00", &[1, 3], "Good morning Sam");
    dispatcher.register(wake.clone()).unwrap();
    let decision = runner.arm_at(wake.spec, &friday);

    let monday_7 = tz.with_ymd_and_hms(2026, 3, 9, 7, 0, 0).single().unwrap();
    assert_eq!(decision.next_fire_epoch_millis, monday_7.timestamp_millis());
    assert!(decision.is_tomorrow_or_later);

    let sunday = tz.with_ymd_and_hms(2026, 3, 8, 23, 59, 0).single().unwrap();
    assert!(runner.collect_due(&sunday).is_empty());

    let fired = runner.collect_due(&monday_7);
    assert_eq!(fired.len(), 1);
    assert_eq!(dispatcher.on_fired(&fired[0]), DispatchOutcome::Accepted);
    wait_for_phase(&arbiter, Phase::Playing);
    assert_eq!(
        backend.spoken()[0].payload,
        SpeechPayload::Text("Good morning Sam".into())
    );

    // Re-armed for Wednesday.
    let wednesday_7 = tz.with_ymd_and_hms(2026, 3, 11, 7, 0, 0).single().unwrap();
    assert_eq!(runner.next_deadline_ms(), Some(wednesday_7.timestamp_millis()));
    assert!(fired_rx.try_recv().is_err());
}

#[test]
fn overlapping_triggers_yield_one_prompt() {
    let (arbiter, backend, _rt) = scripted_arbiter(no_cooldown());
    let dispatcher = WakeDispatcher::new(arbiter.clone(), 5);
    let (fired_tx, _fired_rx) = mpsc::unbounded_channel();
    let (mut runner, _handle) = TriggerRunner::new(fired_tx);

    let now = Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).single().unwrap();
    for (id, text) in [("alarm", "Wake up"), ("pills", "Take your pills")] {
        let r = reminder(id, "07:00", &[], text);
        dispatcher.register(r.clone()).unwrap();
        runner.arm_at(r.spec, &now);
    }

    let seven = Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).single().unwrap();
    let outcomes: Vec<_> = runner
        .collect_due(&seven)
        .iter()
        .map(|f| dispatcher.on_fired(f))
        .collect();

    assert_eq!(
        outcomes,
        vec![
            DispatchOutcome::Accepted,
            DispatchOutcome::Rejected(SessionDecision::Busy)
        ]
    );
    wait_for_phase(&arbiter, Phase::Playing);
    assert_eq!(backend.started(), 1);
    assert_eq!(arbiter.current_session_id().as_deref(), Some("alarm"));
}

#[test]
fn snooze_silences_then_fires_once() {
    let (arbiter, backend, _rt) = scripted_arbiter(no_cooldown());
    let dispatcher = WakeDispatcher::new(arbiter.clone(), 5);
    let (fired_tx, _fired_rx) = mpsc::unbounded_channel();
    let (mut runner, _handle) = TriggerRunner::new(fired_tx);

    let now = Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).single().unwrap();
    let alarm = reminder("alarm", "07:00", &[], "Wake up");
    dispatcher.register(alarm.clone()).unwrap();
    runner.arm_at(alarm.spec, &now);

    let seven = Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).single().unwrap();
    let fired = runner.collect_due(&seven);
    dispatcher.on_fired(&fired[0]);
    wait_for_phase(&arbiter, Phase::Playing);

    let tap = Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 40).single().unwrap();
    let decision = dispatcher.on_snooze_at("alarm", &tap).unwrap();
    assert_eq!(arbiter.phase(), Phase::Idle);
    let snooze_at = Utc.with_ymd_and_hms(2026, 3, 2, 7, 5, 0).single().unwrap();
    assert_eq!(decision.next_fire_epoch_millis, snooze_at.timestamp_millis());
    runner.snooze_at("alarm", 5, &tap).unwrap();

    let fired = runner.collect_due(&snooze_at);
    assert_eq!(fired.len(), 1);
    assert!(fired[0].snoozed);
    assert_eq!(dispatcher.on_fired(&fired[0]), DispatchOutcome::Accepted);
    wait_for_phase(&arbiter, Phase::Playing);
    assert_eq!(backend.started(), 2);

    // The snooze is one-shot; only tomorrow's recurring fire remains.
    let tomorrow = Utc.with_ymd_and_hms(2026, 3, 3, 7, 0, 0).single().unwrap();
    assert_eq!(runner.next_deadline_ms(), Some(tomorrow.timestamp_millis()));
}

#[test]
fn redelivered_fire_is_dropped_by_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let (arbiter, backend, _rt) = scripted_arbiter(no_cooldown());
    let dispatcher = WakeDispatcher::new(arbiter.clone(), 5)
        .with_fire_ledger(FireLedger::new(dir.path().join("fires.jsonl")));
    let (fired_tx, _fired_rx) = mpsc::unbounded_channel();
    let (mut runner, _handle) = TriggerRunner::new(fired_tx);

    let now = Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).single().unwrap();
    let alarm = reminder("alarm", "07:00", &[], "Wake up");
    dispatcher.register(alarm.clone()).unwrap();
    runner.arm_at(alarm.spec, &now);

    let seven = Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).single().unwrap();
    let fired = runner.collect_due(&seven).remove(0);
    assert_eq!(dispatcher.on_fired(&fired), DispatchOutcome::Accepted);
    wait_for_phase(&arbiter, Phase::Playing);
    dispatcher.on_dismiss("alarm");

    assert_eq!(dispatcher.on_fired(&fired), DispatchOutcome::Duplicate);
    assert_eq!(arbiter.phase(), Phase::Idle);
    assert_eq!(backend.started(), 1);
}

#[test]
fn foreground_preempts_any_source() {
    let (arbiter, backend, _rt) = scripted_arbiter(no_cooldown());
    let dispatcher = WakeDispatcher::new(arbiter.clone(), 5);

    assert_eq!(
        dispatcher.on_routine_step("routine-1:step-2", SpeechPayload::Text("Stretch".into()), ""),
        DispatchOutcome::Accepted
    );
    wait_for_phase(&arbiter, Phase::Playing);
    dispatcher.on_foreground();
    assert_eq!(arbiter.phase(), Phase::Idle);
    assert_eq!(backend.live_handles(), 0);

    // Foreground on an idle arbiter is harmless.
    dispatcher.on_foreground();
    arbiter.stop_session("routine-1:step-2", SessionSource::RoutineStep);
    assert_eq!(backend.released(), 1);
}
