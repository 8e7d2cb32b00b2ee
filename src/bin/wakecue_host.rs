//! Wakecue host binary.
//!
//! Loads the config, arms every configured reminder, and speaks each one
//! through the exclusive arbiter when it fires. Ctrl-C silences any active
//! prompt and shuts down.
//!
//! Usage: `wakecue-host [CONFIG_PATH]` or `wakecue-host --list-devices`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use wakecue::arbiter::scripted::ScriptedBackend;
use wakecue::arbiter::{ArbiterEvent, AudioArbiter, SessionSource, SpeechBackend};
use wakecue::audio::{CpalPlayback, SpeakerBackend};
use wakecue::scheduler::{FireLedger, TriggerRunner, compute_next_fire_local};
use wakecue::tts::RemoteSynthesizer;
use wakecue::{WakeConfig, WakeDispatcher};

/// How long a dry-run prompt "plays" before completing.
const DRY_RUN_PLAYBACK: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("wakecue=info")),
        )
        .init();

    let arg = std::env::args_os().nth(1);
    if arg.as_deref() == Some(std::ffi::OsStr::new("--list-devices")) {
        for name in CpalPlayback::list_output_devices()? {
            println!("{name}");
        }
        return Ok(());
    }

    let config_path = arg
        .map(PathBuf::from)
        .unwrap_or_else(WakeConfig::default_config_path);
    let config = if config_path.exists() {
        WakeConfig::from_file(&config_path)
            .map_err(|e| anyhow::anyhow!("cannot load {}: {e}", config_path.display()))?
    } else {
        tracing::warn!(path = %config_path.display(), "config not found, using defaults");
        WakeConfig::default()
    };
    config.validate()?;

    let backend: Arc<dyn SpeechBackend> = if config.audio.dry_run {
        tracing::info!("dry run: prompts are logged, not played");
        Arc::new(ScriptedBackend::with_playback_duration(DRY_RUN_PLAYBACK))
    } else {
        let synthesizer = match RemoteSynthesizer::new(&config.tts) {
            Ok(synth) => Some(synth),
            Err(e) => {
                tracing::warn!("text prompts disabled: {e}");
                None
            }
        };
        Arc::new(SpeakerBackend::new(synthesizer, config.audio.clone()))
    };
    let arbiter = AudioArbiter::new(
        backend,
        config.arbiter.clone(),
        tokio::runtime::Handle::current(),
    );

    let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
    let (runner, runner_handle) = TriggerRunner::new(fired_tx);

    let mut dispatcher = WakeDispatcher::new(arbiter.clone(), config.scheduler.snooze_minutes)
        .with_runner(runner_handle);
    if let Some(path) = &config.scheduler.fire_ledger_path {
        dispatcher = dispatcher.with_fire_ledger(FireLedger::new(path.clone()));
    }

    let reminders = config.reminders()?;
    let count = reminders.len();
    for reminder in reminders {
        let next = compute_next_fire_local(&reminder.spec);
        if next.fallback {
            tracing::warn!(trigger = %reminder.identity(), "no qualifying weekday, firing in 24h");
        }
        tracing::info!(
            trigger = %reminder.identity(),
            next_fire_ms = next.next_fire_epoch_millis,
            tomorrow = next.is_tomorrow_or_later,
            "reminder armed"
        );
        dispatcher.register(reminder)?;
    }

    let cancel = CancellationToken::new();
    let runner_task = runner.run(cancel.clone());
    tokio::spawn(log_events(arbiter.subscribe()));

    tracing::info!(reminders = count, "wakecue-host running");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                break;
            }
            fired = fired_rx.recv() => {
                let Some(fired) = fired else {
                    tracing::warn!("trigger runner stopped");
                    break;
                };
                let outcome = dispatcher.on_fired(&fired);
                tracing::info!(trigger = %fired.identity, ?outcome, "wake dispatched");
            }
        }
    }

    arbiter.force_stop_all(SessionSource::ForceStop);
    cancel.cancel();
    if let Err(e) = runner_task.await {
        tracing::error!("trigger runner task failed: {e}");
    }
    tracing::info!("wakecue-host shut down cleanly");
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<ArbiterEvent>) {
    loop {
        match events.recv().await {
            Ok(ArbiterEvent::PhaseChanged { phase, session_id, .. }) => {
                tracing::info!(%phase, session = session_id.as_deref().unwrap_or("-"), "audio phase");
            }
            Ok(ArbiterEvent::Rejected { session_id, reason, .. }) => {
                tracing::info!(session = %session_id, %reason, "prompt dropped");
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "arbiter event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
