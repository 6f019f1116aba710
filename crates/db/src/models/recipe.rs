use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, QueryBuilder, Sqlite, SqlitePool, types::Json};
use ts_rs::TS;
use uuid::Uuid;

const RECIPE_COLUMNS: &str = "id, user_id, title, description, author, plain, content, image, ingredients, created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct Ingredient {
    pub name: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, TS)]
pub struct Recipe {
    pub id: Uuid,
    pub user_id: Uuid, // Author's user profile id
    pub title: String,
    pub description: String,
    pub author: String,
    pub plain: String,           // Plain-text rendering of the editor content, used for search
    pub content: Option<String>, // Serialized rich-text editor state
    pub image: Option<String>,   // Storage path of the header image
    #[sqlx(json)]
    pub ingredients: Vec<Ingredient>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateRecipe {
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub plain: Option<String>,
    pub content: Option<String>,
    pub image: Option<String>,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateRecipe {
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub plain: Option<String>,
    pub content: Option<String>,
    pub image: Option<String>,
    pub ingredients: Option<Vec<Ingredient>>,
}

impl Recipe {
    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Recipe>(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Most recently updated recipes written by any of `user_ids`, newest first.
    /// Ties on `updated_at` are broken by id so the window is deterministic.
    pub async fn find_window_by_users<'e, E>(
        executor: E,
        user_ids: &[Uuid],
        limit: usize,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if user_ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE user_id IN ("));
        let mut separated = query.separated(", ");
        for user_id in user_ids {
            separated.push_bind(*user_id);
        }
        separated.push_unseparated(") ORDER BY updated_at DESC, id ASC LIMIT ");
        query.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        query.build_query_as::<Recipe>().fetch_all(executor).await
    }

    pub async fn count_by_users<'e, E>(executor: E, user_ids: &[Uuid]) -> Result<i64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if user_ids.is_empty() {
            return Ok(0);
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM recipes WHERE user_id IN (");
        let mut separated = query.separated(", ");
        for user_id in user_ids {
            separated.push_bind(*user_id);
        }
        separated.push_unseparated(")");

        query.build_query_scalar::<i64>().fetch_one(executor).await
    }

    pub async fn create(
        pool: &SqlitePool,
        user_id: Uuid,
        data: &CreateRecipe,
        recipe_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, Recipe>(&format!(
            r#"INSERT INTO recipes (id, user_id, title, description, author, plain, content, image, ingredients, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
               RETURNING {RECIPE_COLUMNS}"#
        ))
        .bind(recipe_id)
        .bind(user_id)
        .bind(&data.title)
        .bind(data.description.as_deref().unwrap_or_default())
        .bind(data.author.as_deref().unwrap_or_default())
        .bind(data.plain.as_deref().unwrap_or_default())
        .bind(&data.content)
        .bind(&data.image)
        .bind(Json(&data.ingredients))
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    /// Apply `data` on top of the stored recipe and bump `updated_at`.
    /// Returns `None` when no recipe with `id` exists.
    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        data: &UpdateRecipe,
    ) -> Result<Option<Self>, sqlx::Error> {
        let Some(existing) = Self::find_by_id(pool, id).await? else {
            return Ok(None);
        };

        let title = data.title.clone().unwrap_or(existing.title);
        let description = data.description.clone().unwrap_or(existing.description);
        let author = data.author.clone().unwrap_or(existing.author);
        let plain = data.plain.clone().unwrap_or(existing.plain);
        let content = data.content.clone().or(existing.content);
        let image = data.image.clone().or(existing.image);
        let ingredients = data.ingredients.clone().unwrap_or(existing.ingredients);

        sqlx::query_as::<_, Recipe>(&format!(
            r#"UPDATE recipes
               SET title = $2, description = $3, author = $4, plain = $5, content = $6, image = $7, ingredients = $8, updated_at = $9
               WHERE id = $1
               RETURNING {RECIPE_COLUMNS}"#
        ))
        .bind(id)
        .bind(title)
        .bind(description)
        .bind(author)
        .bind(plain)
        .bind(content)
        .bind(image)
        .bind(Json(ingredients))
        .bind(Utc::now())
        .fetch_optional(pool)
        .await
    }

    pub async fn delete<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM recipes WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    fn create_recipe(title: &str) -> CreateRecipe {
        CreateRecipe {
            title: title.to_string(),
            description: None,
            author: Some("Ben".to_string()),
            plain: Some(format!("{title} instructions")),
            content: None,
            image: None,
            ingredients: vec![Ingredient {
                name: "flour".to_string(),
                amount: "2 cups".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_create_and_find_roundtrips_ingredients() {
        let db = DBService::new_in_memory().await.unwrap();
        let user_id = Uuid::new_v4();

        let created = Recipe::create(&db.pool, user_id, &create_recipe("Bread"), Uuid::new_v4())
            .await
            .unwrap();
        let found = Recipe::find_by_id(&db.pool, created.id).await.unwrap().unwrap();

        assert_eq!(found, created);
        assert_eq!(found.ingredients.len(), 1);
        assert_eq!(found.ingredients[0].name, "flour");
    }

    #[tokio::test]
    async fn test_window_is_newest_first_and_limited() {
        let db = DBService::new_in_memory().await.unwrap();
        let user_id = Uuid::new_v4();
        let other_user = Uuid::new_v4();

        let mut ids = Vec::new();
        for title in ["one", "two", "three"] {
            let recipe = Recipe::create(&db.pool, user_id, &create_recipe(title), Uuid::new_v4())
                .await
                .unwrap();
            ids.push(recipe.id);
        }
        Recipe::create(&db.pool, other_user, &create_recipe("other"), Uuid::new_v4())
            .await
            .unwrap();

        // Touch the first recipe so it moves to the front.
        let update = UpdateRecipe {
            title: Some("one, revised".to_string()),
            ..Default::default()
        };
        Recipe::update(&db.pool, ids[0], &update).await.unwrap().unwrap();

        let window = Recipe::find_window_by_users(&db.pool, &[user_id], 2).await.unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].id, ids[0]);
        assert_eq!(window[0].title, "one, revised");
        assert!(window[0].updated_at >= window[1].updated_at);

        assert_eq!(Recipe::count_by_users(&db.pool, &[user_id]).await.unwrap(), 3);
        assert_eq!(
            Recipe::count_by_users(&db.pool, &[user_id, other_user]).await.unwrap(),
            4
        );
        assert!(Recipe::find_window_by_users(&db.pool, &[], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_window_and_count_share_a_transaction() {
        let db = DBService::new_in_memory().await.unwrap();
        let user_id = Uuid::new_v4();
        for title in ["one", "two", "three"] {
            Recipe::create(&db.pool, user_id, &create_recipe(title), Uuid::new_v4())
                .await
                .unwrap();
        }

        let mut tx = db.pool.begin().await.unwrap();
        let window = Recipe::find_window_by_users(&mut *tx, &[user_id], 2).await.unwrap();
        let doomed = window[0].id;
        Recipe::delete(&mut *tx, doomed).await.unwrap();
        let remaining = Recipe::find_window_by_users(&mut *tx, &[user_id], 2).await.unwrap();
        let total = Recipe::count_by_users(&mut *tx, &[user_id]).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(window.len(), 2);
        assert!(remaining.iter().all(|r| r.id != doomed));
        assert_eq!(total, 2);
        assert_eq!(Recipe::count_by_users(&db.pool, &[user_id]).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_recipe() {
        let db = DBService::new_in_memory().await.unwrap();
        let missing = Uuid::new_v4();

        assert!(Recipe::update(&db.pool, missing, &UpdateRecipe::default())
            .await
            .unwrap()
            .is_none());
        assert_eq!(Recipe::delete(&db.pool, missing).await.unwrap(), 0);
    }
}
