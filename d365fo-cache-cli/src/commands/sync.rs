// d365fo-cache-cli/src/commands/sync.rs
//
// USE CASE: drive `StartSync`/`GetSyncProgress`/`CancelSync`/`ListSyncSessions`
// /`GetSyncHistory` from the command line.

use crate::context;
use comfy_table::Table;
use d365fo_cache_core::domain::sync::{SyncState, SyncStrategy};
use std::time::Duration;

pub async fn start(env: &str, strategy: Option<SyncStrategy>, language: Option<String>, wait: bool) -> anyhow::Result<()> {
    let core = context::open(env)?;
    let session_id = core.start_sync(strategy, language, None).await?;
    println!("started sync session {session_id}");

    if !wait {
        return Ok(());
    }

    loop {
        let session = core.sync_progress(&session_id)?;
        println!("  [{:?}] {} ({}/{})", session.state, session.phase, session.items_done, session.items_total);
        if session.state.is_terminal() {
            if session.state == SyncState::Failed {
                for msg in &session.error_messages {
                    eprintln!("  error: {msg}");
                }
                std::process::exit(1);
            }
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    Ok(())
}

pub fn status(env: &str, session_id: &str) -> anyhow::Result<()> {
    let core = context::open(env)?;
    let session = core.sync_progress(session_id)?;
    println!("{}", serde_json::to_string_pretty(&session)?);
    Ok(())
}

pub fn cancel(env: &str, session_id: &str) -> anyhow::Result<()> {
    let core = context::open(env)?;
    core.cancel_sync(session_id)?;
    println!("cancellation requested for session {session_id}");
    Ok(())
}

pub fn list(env: &str, state: Option<SyncState>) -> anyhow::Result<()> {
    let core = context::open(env)?;
    let sessions = core.list_sync_sessions(state)?;
    print_sessions(&sessions);
    Ok(())
}

pub fn history(env: &str, limit: usize) -> anyhow::Result<()> {
    let core = context::open(env)?;
    let sessions = core.sync_history(limit)?;
    print_sessions(&sessions);
    Ok(())
}

fn print_sessions(sessions: &[d365fo_cache_core::domain::sync::SyncSession]) {
    let mut table = Table::new();
    table.set_header(vec!["session", "strategy", "state", "phase", "progress", "started"]);
    for s in sessions {
        table.add_row(vec![
            s.session_id.clone(),
            format!("{:?}", s.strategy),
            format!("{:?}", s.state),
            s.phase.clone(),
            format!("{}/{}", s.items_done, s.items_total),
            s.started_at.to_rfc3339(),
        ]);
    }
    println!("{table}");
}
