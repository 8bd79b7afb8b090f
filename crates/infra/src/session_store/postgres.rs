//! Postgres-backed session store.
//!
//! ## Error mapping
//!
//! | SQLx error | Postgres code | `StoreError` |
//! |------------|---------------|--------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | Database (other) | any | `Storage` |
//! | PoolClosed / network / other | n/a | `Storage` |
//!
//! ## Compare-and-set
//!
//! Revocation is a single `UPDATE ... WHERE revoked = false RETURNING id`.
//! Concurrent updates of the same row queue on the row lock and re-check the
//! predicate, so exactly one of them sees a returned row.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use keyward_auth::{RevokeOutcome, RotateOutcome, SessionEntry, SessionStore, StoreError};
use keyward_core::{TokenId, Username};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS auth_sessions (
    id          UUID PRIMARY KEY,
    principal   TEXT NOT NULL,
    issued_at   TIMESTAMPTZ NOT NULL,
    expires_at  TIMESTAMPTZ NOT NULL,
    revoked     BOOLEAN NOT NULL DEFAULT FALSE,
    revoked_at  TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS auth_sessions_principal_idx ON auth_sessions (principal);
CREATE INDEX IF NOT EXISTS auth_sessions_expires_at_idx ON auth_sessions (expires_at);
"#;

#[derive(Debug, Clone)]
pub struct PostgresSessionStore {
    pool: Arc<PgPool>,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the session table and its indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn fetch_in(
        tx: &mut Transaction<'_, Postgres>,
        id: &TokenId,
    ) -> Result<Option<SessionEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, principal, issued_at, expires_at, revoked
            FROM auth_sessions
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("fetch_session", e))?;

        row.map(|r| decode(&r)).transpose()
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    #[instrument(skip(self, entry), fields(jti = %entry.id, username = %entry.principal), err)]
    async fn register(&self, entry: SessionEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO auth_sessions (id, principal, issued_at, expires_at, revoked)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.principal.as_str())
        .bind(entry.issued_at)
        .bind(entry.expires_at)
        .bind(entry.revoked)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("register_session", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: &TokenId) -> Result<Option<SessionEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, principal, issued_at, expires_at, revoked
            FROM auth_sessions
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_session", e))?;

        row.map(|r| decode(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn is_live(&self, id: &TokenId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM auth_sessions
                WHERE id = $1 AND revoked = FALSE AND expires_at > $2
            ) AS live
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("is_live", e))?;

        row.try_get("live").map_err(|e| map_sqlx_error("is_live", e))
    }

    #[instrument(skip(self), err)]
    async fn revoke(&self, id: &TokenId) -> Result<RevokeOutcome, StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE auth_sessions
            SET revoked = TRUE, revoked_at = now()
            WHERE id = $1 AND revoked = FALSE
            RETURNING id
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("revoke_session", e))?;

        if updated.is_some() {
            return Ok(RevokeOutcome::Revoked);
        }

        Ok(match self.get(id).await? {
            Some(_) => RevokeOutcome::AlreadyRevoked,
            None => RevokeOutcome::Missing,
        })
    }

    /// Insert the successor and revoke `old` in one transaction; the insert
    /// is rolled back when `old` is not live.
    #[instrument(skip(self, new), fields(new_jti = %new.id), err)]
    async fn rotate(
        &self,
        old: &TokenId,
        new: SessionEntry,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO auth_sessions (id, principal, issued_at, expires_at, revoked)
            VALUES ($1, $2, $3, $4, FALSE)
            "#,
        )
        .bind(new.id.as_uuid())
        .bind(new.principal.as_str())
        .bind(new.issued_at)
        .bind(new.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_successor", e))?;

        let revoked = sqlx::query(
            r#"
            UPDATE auth_sessions
            SET revoked = TRUE, revoked_at = $2
            WHERE id = $1 AND revoked = FALSE AND expires_at > $2
            RETURNING id
            "#,
        )
        .bind(old.as_uuid())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("revoke_predecessor", e))?;

        if revoked.is_some() {
            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("commit_transaction", e))?;
            return Ok(RotateOutcome::Rotated);
        }

        let current = Self::fetch_in(&mut tx, old).await?;
        tx.rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))?;

        Ok(match current {
            None => RotateOutcome::Missing,
            Some(entry) if entry.revoked => RotateOutcome::AlreadyRevoked(entry),
            Some(entry) => RotateOutcome::Expired(entry),
        })
    }

    #[instrument(skip(self), fields(username = %principal), err)]
    async fn revoke_all_for(&self, principal: &Username) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE auth_sessions
            SET revoked = TRUE, revoked_at = now()
            WHERE principal = $1 AND revoked = FALSE
            "#,
        )
        .bind(principal.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("revoke_all_for", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(username = %principal), err)]
    async fn live_sessions(
        &self,
        principal: &Username,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, principal, issued_at, expires_at, revoked
            FROM auth_sessions
            WHERE principal = $1 AND revoked = FALSE AND expires_at > $2
            ORDER BY issued_at ASC
            "#,
        )
        .bind(principal.as_str())
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("live_sessions", e))?;

        rows.iter().map(decode).collect()
    }

    #[instrument(skip(self), err)]
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM auth_sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("sweep_expired", e))?;

        Ok(result.rows_affected())
    }
}

struct SessionRow {
    id: Uuid,
    principal: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked: bool,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for SessionRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(SessionRow {
            id: row.try_get("id")?,
            principal: row.try_get("principal")?,
            issued_at: row.try_get("issued_at")?,
            expires_at: row.try_get("expires_at")?,
            revoked: row.try_get("revoked")?,
        })
    }
}

impl From<SessionRow> for SessionEntry {
    fn from(row: SessionRow) -> Self {
        SessionEntry {
            id: TokenId::from_uuid(row.id),
            principal: Username::new(row.principal),
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            revoked: row.revoked,
        }
    }
}

fn decode(row: &sqlx::postgres::PgRow) -> Result<SessionEntry, StoreError> {
    SessionRow::from_row(row)
        .map(SessionEntry::from)
        .map_err(|e| StoreError::Storage(format!("failed to decode session row: {e}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::AlreadyExists(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Storage(format!("connection pool closed in {operation}")),
        other => StoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
