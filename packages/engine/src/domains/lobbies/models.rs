//! Lobby rows and membership.
//!
//! A lobby is a room-code-addressed gathering bound to a PENDING session
//! from the moment it is created. The lobby row is deleted once the
//! countdown fires and the session goes live, so "lobby exists" and "game
//! not started" are the same fact.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgExecutor};

use crate::common::{LobbyId, SessionId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Lobby {
    pub id: LobbyId,
    pub room_code: String,
    pub session_id: SessionId,
    pub admin_user_id: UserId,
    pub countdown_fires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LobbyMember {
    pub lobby_id: LobbyId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
}

impl Lobby {
    pub async fn create(
        room_code: &str,
        session_id: SessionId,
        admin_user_id: UserId,
        executor: impl PgExecutor<'_>,
    ) -> Result<Self> {
        let lobby = sqlx::query_as::<_, Lobby>(
            r#"
            INSERT INTO lobbies (id, room_code, session_id, admin_user_id)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(LobbyId::new())
        .bind(room_code)
        .bind(session_id)
        .bind(admin_user_id)
        .fetch_one(executor)
        .await?;
        Ok(lobby)
    }

    /// Lock a lobby by room code. All membership and countdown mutations go
    /// through this lock, so a fire racing a cancel serializes here.
    pub async fn lock_by_room_code(
        room_code: &str,
        conn: &mut PgConnection,
    ) -> Result<Option<Self>> {
        let lobby =
            sqlx::query_as::<_, Lobby>("SELECT * FROM lobbies WHERE room_code = $1 FOR UPDATE")
                .bind(room_code)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(lobby)
    }

    pub async fn lock_by_id(id: LobbyId, conn: &mut PgConnection) -> Result<Option<Self>> {
        let lobby = sqlx::query_as::<_, Lobby>("SELECT * FROM lobbies WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(lobby)
    }

    pub async fn set_countdown(
        id: LobbyId,
        fires_at: Option<DateTime<Utc>>,
        executor: impl PgExecutor<'_>,
    ) -> Result<()> {
        sqlx::query("UPDATE lobbies SET countdown_fires_at = $2 WHERE id = $1")
            .bind(id)
            .bind(fires_at)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn set_admin(
        id: LobbyId,
        admin_user_id: UserId,
        executor: impl PgExecutor<'_>,
    ) -> Result<()> {
        sqlx::query("UPDATE lobbies SET admin_user_id = $2 WHERE id = $1")
            .bind(id)
            .bind(admin_user_id)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn delete(id: LobbyId, executor: impl PgExecutor<'_>) -> Result<()> {
        sqlx::query("DELETE FROM lobbies WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }
}

impl LobbyMember {
    /// Add a member. Re-joining is a no-op rather than an error.
    pub async fn add(
        lobby_id: LobbyId,
        user_id: UserId,
        executor: impl PgExecutor<'_>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO lobby_members (lobby_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (lobby_id, user_id) DO NOTHING
            "#,
        )
        .bind(lobby_id)
        .bind(user_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn remove(
        lobby_id: LobbyId,
        user_id: UserId,
        executor: impl PgExecutor<'_>,
    ) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM lobby_members WHERE lobby_id = $1 AND user_id = $2")
                .bind(lobby_id)
                .bind(user_id)
                .execute(executor)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list(lobby_id: LobbyId, executor: impl PgExecutor<'_>) -> Result<Vec<Self>> {
        let members = sqlx::query_as::<_, LobbyMember>(
            "SELECT * FROM lobby_members WHERE lobby_id = $1 ORDER BY joined_at",
        )
        .bind(lobby_id)
        .fetch_all(executor)
        .await?;
        Ok(members)
    }
}
