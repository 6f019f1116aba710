use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, TS)]
pub struct UserProfile {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpsertUserProfile {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

impl UserProfile {
    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, UserProfile>(
            r#"SELECT id, display_name, email, photo_url, created_at, updated_at
               FROM user_profiles
               WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn upsert(
        pool: &SqlitePool,
        id: Uuid,
        data: &UpsertUserProfile,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, UserProfile>(
            r#"INSERT INTO user_profiles (id, display_name, email, photo_url, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $5)
               ON CONFLICT(id) DO UPDATE SET
                   display_name = COALESCE(excluded.display_name, user_profiles.display_name),
                   email = COALESCE(excluded.email, user_profiles.email),
                   photo_url = COALESCE(excluded.photo_url, user_profiles.photo_url),
                   updated_at = excluded.updated_at
               RETURNING id, display_name, email, photo_url, created_at, updated_at"#,
        )
        .bind(id)
        .bind(&data.display_name)
        .bind(&data.email)
        .bind(&data.photo_url)
        .bind(now)
        .fetch_one(pool)
        .await
    }
}
