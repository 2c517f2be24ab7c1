//! Lobby orchestration: room-code joins, admin-gated countdown, and the
//! countdown-fired handler that converts the lobby into a live session.

use serde_json::json;
use sqlx::PgConnection;
use tracing::info;

use crate::common::{GameMode, LobbyId, ModeParams, SessionId, SessionStatus, UserId};
use crate::domains::lobbies::models::{Lobby, LobbyMember};
use crate::domains::matchmaking::models::WaitingEntry;
use crate::domains::sessions::models::{GameSession, Participant};
use crate::domains::sessions::orchestrator;
use crate::error::{EngineError, EngineResult};
use crate::kernel::deps::EngineDeps;
use crate::kernel::gateway::Address;
use crate::kernel::jobs::{self, ScheduleOptions, JOB_LOBBY_COUNTDOWN};
use crate::kernel::router::LobbyCountdownArgs;

/// Join a lobby by room code, creating it on first join. The creator
/// becomes admin and a PENDING session is bound to the lobby immediately;
/// members only become participants once the countdown fires.
pub async fn join_lobby(
    deps: &EngineDeps,
    user_id: UserId,
    room_code: &str,
    mode: GameMode,
    duration_secs: i32,
    params: &ModeParams,
) -> EngineResult<Lobby> {
    let mut tx = deps.db_pool.begin().await?;

    if Participant::user_in_live_session(user_id, &mut *tx).await? {
        return Err(EngineError::AlreadyInSession);
    }
    if WaitingEntry::find_by_user(user_id, &mut *tx).await?.is_some() {
        return Err(EngineError::AlreadyQueued);
    }

    let lobby = match Lobby::lock_by_room_code(room_code, &mut *tx).await? {
        Some(lobby) => lobby,
        None => {
            let (session, _) = orchestrator::create_session_tx(
                &mut *tx,
                &deps.config,
                mode,
                duration_secs,
                params,
                &[],
                SessionStatus::Pending,
            )
            .await?;
            let lobby = Lobby::create(room_code, session.id, user_id, &mut *tx).await?;
            info!(lobby_id = %lobby.id, room_code = %room_code, "created lobby");
            lobby
        }
    };

    LobbyMember::add(lobby.id, user_id, &mut *tx).await?;
    let members = LobbyMember::list(lobby.id, &mut *tx).await?;
    tx.commit().await?;

    emit_membership_update(deps, &lobby, &members).await?;
    Ok(lobby)
}

/// Leave a lobby. The last member out deletes the lobby (and its pending
/// session, via cascade); a departing admin hands the role to the
/// longest-standing remaining member.
pub async fn leave_lobby(deps: &EngineDeps, user_id: UserId, room_code: &str) -> EngineResult<()> {
    let mut tx = deps.db_pool.begin().await?;

    let Some(mut lobby) = Lobby::lock_by_room_code(room_code, &mut *tx).await? else {
        return Err(EngineError::LobbyNotFound(room_code.to_string()));
    };

    LobbyMember::remove(lobby.id, user_id, &mut *tx).await?;
    let members = LobbyMember::list(lobby.id, &mut *tx).await?;

    if members.is_empty() {
        Lobby::delete(lobby.id, &mut *tx).await?;
        sqlx::query("DELETE FROM game_sessions WHERE id = $1 AND status = 'pending'")
            .bind(lobby.session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        deps.jobs
            .cancel(&jobs::lobby_countdown_identity(lobby.id))
            .await?;
        info!(lobby_id = %lobby.id, room_code = %room_code, "deleted empty lobby");
        return Ok(());
    }

    if lobby.admin_user_id == user_id {
        let successor = members[0].user_id;
        Lobby::set_admin(lobby.id, successor, &mut *tx).await?;
        lobby.admin_user_id = successor;
    }
    tx.commit().await?;

    emit_membership_update(deps, &lobby, &members).await?;
    Ok(())
}

/// Start (or restart) the pre-game countdown. Admin-only. Re-initiating
/// replaces the previous timer via the job identity, so there is never more
/// than one live countdown per lobby.
pub async fn initiate_countdown(
    deps: &EngineDeps,
    user_id: UserId,
    room_code: &str,
    delay_secs: i32,
) -> EngineResult<()> {
    let mut tx = deps.db_pool.begin().await?;

    let Some(lobby) = Lobby::lock_by_room_code(room_code, &mut *tx).await? else {
        return Err(EngineError::LobbyNotFound(room_code.to_string()));
    };
    if lobby.admin_user_id != user_id {
        return Err(EngineError::PermissionDenied(
            "only the lobby admin may start the countdown".to_string(),
        ));
    }

    let fires_at = chrono::Utc::now() + chrono::Duration::seconds(delay_secs as i64);
    Lobby::set_countdown(lobby.id, Some(fires_at), &mut *tx).await?;
    tx.commit().await?;

    deps.jobs
        .schedule(ScheduleOptions::delayed(
            JOB_LOBBY_COUNTDOWN,
            jobs::lobby_countdown_identity(lobby.id),
            serde_json::to_value(LobbyCountdownArgs { lobby_id: lobby.id })
                .map_err(anyhow::Error::from)?,
            fires_at,
        ))
        .await?;

    deps.gateway
        .emit(
            Address::Room(room_code.to_string()),
            "countdown_started",
            json!({"room_code": room_code, "fires_at": fires_at, "delay_secs": delay_secs}),
        )
        .await?;
    Ok(())
}

/// Cancel a pending countdown. Admin-only. If the timer already fired the
/// cancel is a no-op on the queue side and the game proceeds.
pub async fn cancel_countdown(
    deps: &EngineDeps,
    user_id: UserId,
    room_code: &str,
) -> EngineResult<()> {
    let mut tx = deps.db_pool.begin().await?;

    let Some(lobby) = Lobby::lock_by_room_code(room_code, &mut *tx).await? else {
        return Err(EngineError::LobbyNotFound(room_code.to_string()));
    };
    if lobby.admin_user_id != user_id {
        return Err(EngineError::PermissionDenied(
            "only the lobby admin may cancel the countdown".to_string(),
        ));
    }

    Lobby::set_countdown(lobby.id, None, &mut *tx).await?;
    tx.commit().await?;

    deps.jobs
        .cancel(&jobs::lobby_countdown_identity(lobby.id))
        .await?;

    deps.gateway
        .emit(
            Address::Room(room_code.to_string()),
            "countdown_cancelled",
            json!({"room_code": room_code}),
        )
        .await?;
    Ok(())
}

/// Countdown fired: promote the eligible members to participants, activate
/// the session, and drop the lobby. A lobby deleted or cancelled between
/// scheduling and firing makes this a no-op.
pub async fn handle_countdown_fired(deps: &EngineDeps, lobby_id: LobbyId) -> EngineResult<()> {
    let mut tx = deps.db_pool.begin().await?;

    let Some(lobby) = Lobby::lock_by_id(lobby_id, &mut *tx).await? else {
        info!(lobby_id = %lobby_id, "countdown fired for missing lobby, ignoring");
        return Ok(());
    };
    if lobby.countdown_fires_at.is_none() {
        // Cancelled after this job was claimed; leave the lobby as is.
        info!(lobby_id = %lobby_id, "countdown fired but was cancelled, ignoring");
        return Ok(());
    }

    let members = LobbyMember::list(lobby.id, &mut *tx).await?;

    let mut participants = Vec::with_capacity(members.len());
    for member in &members {
        // A member who matched into another game while the countdown ran
        // keeps that game; promoting them here would hand them a second live
        // session.
        if Participant::user_in_live_session(member.user_id, &mut *tx).await? {
            info!(
                lobby_id = %lobby.id,
                user_id = %member.user_id,
                "member already in a live session, not promoting"
            );
            continue;
        }
        // Promotion supersedes any matchmaking request they still have open.
        if let Some(entry) = WaitingEntry::find_by_user(member.user_id, &mut *tx).await? {
            WaitingEntry::delete_by_id(entry.id, &mut *tx).await?;
        }
        participants
            .push(Participant::create(lobby.session_id, member.user_id, &mut *tx).await?);
    }

    if participants.is_empty() {
        Lobby::delete(lobby.id, &mut *tx).await?;
        sqlx::query("DELETE FROM game_sessions WHERE id = $1 AND status = 'pending'")
            .bind(lobby.session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(lobby_id = %lobby.id, "no promotable members at countdown, dropped lobby");
        return Ok(());
    }
    GameSession::activate(lobby.session_id, &mut *tx).await?;
    Lobby::delete(lobby.id, &mut *tx).await?;

    let session = load_session(lobby.session_id, &mut *tx).await?;
    tx.commit().await?;

    info!(
        lobby_id = %lobby.id,
        session_id = %session.id,
        players = participants.len(),
        "lobby countdown fired, session live"
    );

    orchestrator::arm_session_timers(deps, &session).await?;
    orchestrator::emit_opening_questions(deps, &session, &participants).await?;
    deps.gateway
        .emit(
            Address::Session(session.id),
            "match_found",
            json!({
                "session_id": session.id,
                "mode": session.mode,
                "duration_secs": session.duration_secs,
                "participants": participants
                    .iter()
                    .map(|p| json!({"participant_id": p.id, "user_id": p.user_id}))
                    .collect::<Vec<_>>(),
            }),
        )
        .await?;
    Ok(())
}

async fn load_session(
    session_id: SessionId,
    conn: &mut PgConnection,
) -> EngineResult<GameSession> {
    GameSession::find_by_id(session_id, &mut *conn)
        .await?
        .ok_or(EngineError::SessionClosed)
}

async fn emit_membership_update(
    deps: &EngineDeps,
    lobby: &Lobby,
    members: &[LobbyMember],
) -> EngineResult<()> {
    deps.gateway
        .emit(
            Address::Room(lobby.room_code.clone()),
            "lobby_membership_update",
            json!({
                "room_code": lobby.room_code,
                "admin_user_id": lobby.admin_user_id,
                "countdown_fires_at": lobby.countdown_fires_at,
                "members": members.iter().map(|m| m.user_id).collect::<Vec<_>>(),
            }),
        )
        .await?;
    Ok(())
}
