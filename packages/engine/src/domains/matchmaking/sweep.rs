//! The periodic waiting-pool sweep.
//!
//! Runs as a repeating durable job. Each tick widens the tolerance of every
//! entry that has waited at least one interval, expires entries past the
//! hard ceiling, then retries pairing among the now-wider survivors. Each
//! pairing commits in its own transaction so one contended pair never holds
//! up the rest of the pool.

use serde_json::json;
use tracing::{info, warn};

use crate::common::{GameMode, SessionStatus, WaitingEntryId};
use crate::domains::matchmaking::actions;
use crate::domains::matchmaking::models::WaitingEntry;
use crate::domains::sessions::orchestrator;
use crate::error::EngineResult;
use crate::kernel::deps::EngineDeps;
use crate::kernel::gateway::Address;

pub async fn run_sweep(deps: &EngineDeps) -> EngineResult<()> {
    let waited_since =
        chrono::Utc::now() - chrono::Duration::seconds(deps.config.sweep_interval_secs);

    let mut tx = deps.db_pool.begin().await?;
    let widened =
        WaitingEntry::widen_stale(deps.config.tolerance_step, waited_since, &mut *tx).await?;
    let expired = WaitingEntry::expire(deps.config.max_sweep_ticks, &mut *tx).await?;
    tx.commit().await?;

    if widened > 0 || !expired.is_empty() {
        info!(widened, expired = expired.len(), "swept waiting pool");
    }

    for entry in &expired {
        deps.gateway
            .emit(
                Address::User(entry.user_id),
                "matchmaking_timeout",
                json!({"mode": entry.mode, "waited_secs": (chrono::Utc::now() - entry.enqueued_at).num_seconds()}),
            )
            .await?;
    }

    pair_pool(deps).await
}

/// Walk the pool oldest-first, pairing each entry against its closest
/// compatible partner. Visited-but-unpaired entries are skipped for the rest
/// of this pass; they get another chance next tick.
async fn pair_pool(deps: &EngineDeps) -> EngineResult<()> {
    let mut visited: Vec<WaitingEntryId> = Vec::new();

    loop {
        let mut tx = deps.db_pool.begin().await?;
        let Some(entry) = WaitingEntry::lock_oldest_excluding(&visited, &mut *tx).await? else {
            break;
        };

        let mode: GameMode = match entry.mode.parse() {
            Ok(mode) => mode,
            Err(_) => {
                warn!(entry_id = %entry.id, mode = %entry.mode, "dropping pool entry with unknown mode");
                WaitingEntry::delete_by_id(entry.id, &mut *tx).await?;
                tx.commit().await?;
                continue;
            }
        };

        let opponent = WaitingEntry::claim_compatible(
            mode,
            entry.duration_secs,
            entry.skill_rating,
            entry.tolerance,
            entry.user_id,
            &mut *tx,
        )
        .await?;

        let Some(opponent) = opponent else {
            visited.push(entry.id);
            tx.commit().await?;
            continue;
        };

        WaitingEntry::delete_by_id(entry.id, &mut *tx).await?;
        // Same preference rule as an immediate pairing: the longer-waiting
        // side wins, the other fills the gaps.
        let params = actions::merge_params(&entry.mode_params(), &opponent.mode_params());
        let (session, participants) = orchestrator::create_session_tx(
            &mut *tx,
            &deps.config,
            mode,
            entry.duration_secs,
            &params,
            &[entry.user_id, opponent.user_id],
            SessionStatus::Active,
        )
        .await?;
        tx.commit().await?;

        info!(
            session_id = %session.id,
            entry_id = %entry.id,
            opponent_entry_id = %opponent.id,
            "paired stale pool entries"
        );

        actions::announce_match(deps, &session, &participants).await?;
        orchestrator::arm_session_timers(deps, &session).await?;
        orchestrator::emit_opening_questions(deps, &session, &participants).await?;
    }

    Ok(())
}
