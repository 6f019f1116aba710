use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

/// Pending follow requests shown to a user are capped at this many rows.
pub const PENDING_REQUEST_LIMIT: i64 = 50;
/// Upper bound on the followed-user list used to scope search keys.
pub const FOLLOWING_LIMIT: i64 = 1000;

/// A follow relation: `from_user_id` follows `to_user_id` once confirmed by the latter.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, TS)]
pub struct Relation {
    pub id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateRelation {
    pub to_user_id: Uuid,
}

impl Relation {
    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Relation>(
            r#"SELECT id, from_user_id, to_user_id, confirmed, created_at
               FROM relations
               WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Create an unconfirmed follow request. Re-requesting an existing pair returns the stored row.
    pub async fn request(
        pool: &SqlitePool,
        from_user_id: Uuid,
        to_user_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Relation>(
            r#"INSERT INTO relations (id, from_user_id, to_user_id, confirmed, created_at)
               VALUES ($1, $2, $3, 0, $4)
               ON CONFLICT(from_user_id, to_user_id) DO UPDATE SET
                   from_user_id = excluded.from_user_id
               RETURNING id, from_user_id, to_user_id, confirmed, created_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(from_user_id)
        .bind(to_user_id)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn confirm(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Relation>(
            r#"UPDATE relations
               SET confirmed = 1
               WHERE id = $1
               RETURNING id, from_user_id, to_user_id, confirmed, created_at"#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM relations WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Unconfirmed requests addressed to `to_user_id`, oldest first.
    pub async fn find_pending_for(
        pool: &SqlitePool,
        to_user_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Relation>(
            r#"SELECT id, from_user_id, to_user_id, confirmed, created_at
               FROM relations
               WHERE to_user_id = $1 AND confirmed = 0
               ORDER BY created_at ASC
               LIMIT $2"#,
        )
        .bind(to_user_id)
        .bind(PENDING_REQUEST_LIMIT)
        .fetch_all(pool)
        .await
    }

    /// Everyone who follows (or asked to follow) `to_user_id`, unconfirmed first.
    pub async fn find_followers(
        pool: &SqlitePool,
        to_user_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Relation>(
            r#"SELECT id, from_user_id, to_user_id, confirmed, created_at
               FROM relations
               WHERE to_user_id = $1
               ORDER BY confirmed ASC, created_at ASC
               LIMIT $2"#,
        )
        .bind(to_user_id)
        .bind(PENDING_REQUEST_LIMIT)
        .fetch_all(pool)
        .await
    }

    /// Everyone `from_user_id` follows (or asked to follow), unconfirmed first.
    pub async fn find_following(
        pool: &SqlitePool,
        from_user_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Relation>(
            r#"SELECT id, from_user_id, to_user_id, confirmed, created_at
               FROM relations
               WHERE from_user_id = $1
               ORDER BY confirmed ASC, created_at ASC
               LIMIT $2"#,
        )
        .bind(from_user_id)
        .bind(PENDING_REQUEST_LIMIT)
        .fetch_all(pool)
        .await
    }

    /// Ids of users `from_user_id` follows with a confirmed relation.
    pub async fn find_confirmed_following_ids(
        pool: &SqlitePool,
        from_user_id: Uuid,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            r#"SELECT to_user_id
               FROM relations
               WHERE from_user_id = $1 AND confirmed = 1
               ORDER BY created_at ASC
               LIMIT $2"#,
        )
        .bind(from_user_id)
        .bind(FOLLOWING_LIMIT)
        .fetch_all(pool)
        .await
    }
}
