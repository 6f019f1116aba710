//! Recipe CRUD routes. Writes are restricted to the recipe's author.

use axum::{
    Json, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::recipe::{CreateRecipe, Recipe, UpdateRecipe};
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, auth::AuthUser, error::ApiError};

pub async fn get_recipe(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(recipe_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Recipe>>, ApiError> {
    let recipe = state.store().find_recipe(recipe_id).await?;
    Ok(ResponseJson(ApiResponse::success(recipe)))
}

pub async fn create_recipe(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
    Json(payload): Json<CreateRecipe>,
) -> Result<ResponseJson<ApiResponse<Recipe>>, ApiError> {
    if payload.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }
    let recipe = state.store().create_recipe(session.user_id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(recipe)))
}

pub async fn update_recipe(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
    Path(recipe_id): Path<Uuid>,
    Json(payload): Json<UpdateRecipe>,
) -> Result<ResponseJson<ApiResponse<Recipe>>, ApiError> {
    if payload.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }
    let recipe = state
        .store()
        .update_recipe(session.user_id, recipe_id, &payload)
        .await?;
    Ok(ResponseJson(ApiResponse::success(recipe)))
}

pub async fn delete_recipe(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
    Path(recipe_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.store().delete_recipe(session.user_id, recipe_id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().route("/recipes", post(create_recipe)).route(
        "/recipes/{recipe_id}",
        get(get_recipe).put(update_recipe).delete(delete_recipe),
    )
}

#[cfg(test)]
mod tests {
    use db::DBService;
    use services::services::config::Config;
    use utils::session::Session;

    use super::*;

    async fn test_state() -> AppState {
        let config = Config::from_lookup(|key| (key == "SESSION_SECRET").then(|| "secret".to_string()))
            .unwrap();
        AppState::new(config, DBService::new_in_memory().await.unwrap())
    }

    fn user(user_id: Uuid) -> AuthUser {
        AuthUser(Session {
            user_id,
            email: None,
            name: None,
            picture: None,
        })
    }

    fn payload(title: &str) -> CreateRecipe {
        CreateRecipe {
            title: title.to_string(),
            description: None,
            author: None,
            plain: None,
            content: None,
            image: None,
            ingredients: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_create_and_fetch_recipe() {
        let state = test_state().await;
        let me = Uuid::new_v4();

        let created = create_recipe(State(state.clone()), user(me), Json(payload("Bread")))
            .await
            .unwrap()
            .0
            .into_data()
            .unwrap();
        assert_eq!(created.user_id, me);

        let fetched = get_recipe(State(state), user(Uuid::new_v4()), Path(created.id))
            .await
            .unwrap()
            .0
            .into_data()
            .unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_blank_title_rejected() {
        let state = test_state().await;
        let result = create_recipe(State(state), user(Uuid::new_v4()), Json(payload("  "))).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_delete_by_other_user_forbidden() {
        let state = test_state().await;
        let owner = Uuid::new_v4();
        let recipe = state
            .store()
            .create_recipe(owner, &payload("Cake"))
            .await
            .unwrap();

        let result = delete_recipe(State(state.clone()), user(Uuid::new_v4()), Path(recipe.id)).await;
        assert!(matches!(
            result,
            Err(ApiError::RecipeStore(services::services::recipe_store::RecipeStoreError::Forbidden))
        ));
        assert!(delete_recipe(State(state), user(owner), Path(recipe.id)).await.is_ok());
    }
}
