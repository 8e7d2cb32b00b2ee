//! Shared helpers for integration tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use wakecue::arbiter::scripted::ScriptedBackend;
use wakecue::arbiter::{ArbiterEvent, AudioArbiter, Phase};
use wakecue::config::ArbiterConfig;

/// Build an arbiter over a scripted backend on a dedicated multi-thread
/// runtime. Returns `(arbiter, backend, runtime)`; keep the runtime alive for
/// the duration of the test.
pub(crate) fn scripted_arbiter(
    config: ArbiterConfig,
) -> (AudioArbiter, Arc<ScriptedBackend>, tokio::runtime::Runtime) {
    let rt = tokio::runtime::Runtime::new().expect("create tokio runtime");
    let backend = Arc::new(ScriptedBackend::new());
    let arbiter = AudioArbiter::new(backend.clone(), config, rt.handle().clone());
    (arbiter, backend, rt)
}

/// Arbiter config with no cooldown and the default timeouts.
pub(crate) fn no_cooldown() -> ArbiterConfig {
    ArbiterConfig {
        cooldown_ms: 0,
        ..ArbiterConfig::default()
    }
}

/// Poll until the arbiter reaches `phase`, panicking after two seconds.
pub(crate) fn wait_for_phase(arbiter: &AudioArbiter, phase: Phase) {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while arbiter.phase() != phase {
        assert!(
            std::time::Instant::now() < deadline,
            "arbiter stuck in {} waiting for {phase}",
            arbiter.phase()
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Drain all pending events from the broadcast receiver into a Vec.
pub(crate) fn drain_events(rx: &mut broadcast::Receiver<ArbiterEvent>) -> Vec<ArbiterEvent> {
    let mut events = Vec::new();
    while let Ok(evt) = rx.try_recv() {
        events.push(evt);
    }
    events
}
