//! Write path for recipes, follow relations and user profiles.
//!
//! Every successful write is announced on a broadcast channel so live feeds can
//! re-evaluate their windows.

use db::{
    DBService,
    models::{
        recipe::{CreateRecipe, Recipe, UpdateRecipe},
        relation::Relation,
        user_profile::{UpsertUserProfile, UserProfile},
    },
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use super::recipe_feed::RecipeFeed;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum RecipeStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("recipe not found")]
    RecipeNotFound,
    #[error("relation not found")]
    RelationNotFound,
    #[error("user not found")]
    UserNotFound,
    #[error("not allowed to modify this resource")]
    Forbidden,
    #[error("cannot follow yourself")]
    SelfFollow,
}

/// What changed in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    Recipe { recipe_id: Uuid, user_id: Uuid },
    Relation { from_user_id: Uuid, to_user_id: Uuid },
    UserProfile { user_id: Uuid },
}

#[derive(Clone)]
pub struct RecipeStore {
    db: DBService,
    changes: broadcast::Sender<StoreChange>,
}

impl RecipeStore {
    pub fn new(db: DBService) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { db, changes }
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Live source over this store's recipes.
    pub fn feed(&self) -> RecipeFeed {
        RecipeFeed::new(self.db.clone(), self.changes.clone())
    }

    fn publish(&self, change: StoreChange) {
        // No receivers just means no live feed is open.
        let receivers = self.changes.send(change).unwrap_or(0);
        debug!(?change, receivers, "Store change published");
    }

    pub async fn find_recipe(&self, id: Uuid) -> Result<Recipe, RecipeStoreError> {
        Recipe::find_by_id(&self.db.pool, id)
            .await?
            .ok_or(RecipeStoreError::RecipeNotFound)
    }

    pub async fn create_recipe(
        &self,
        user_id: Uuid,
        data: &CreateRecipe,
    ) -> Result<Recipe, RecipeStoreError> {
        let recipe = Recipe::create(&self.db.pool, user_id, data, Uuid::new_v4()).await?;
        info!(recipe_id = %recipe.id, user_id = %user_id, "Recipe created");
        self.publish(StoreChange::Recipe {
            recipe_id: recipe.id,
            user_id,
        });
        Ok(recipe)
    }

    pub async fn update_recipe(
        &self,
        user_id: Uuid,
        id: Uuid,
        data: &UpdateRecipe,
    ) -> Result<Recipe, RecipeStoreError> {
        let existing = self.find_recipe(id).await?;
        if existing.user_id != user_id {
            return Err(RecipeStoreError::Forbidden);
        }

        let recipe = Recipe::update(&self.db.pool, id, data)
            .await?
            .ok_or(RecipeStoreError::RecipeNotFound)?;
        info!(recipe_id = %id, user_id = %user_id, "Recipe updated");
        self.publish(StoreChange::Recipe {
            recipe_id: id,
            user_id,
        });
        Ok(recipe)
    }

    pub async fn delete_recipe(&self, user_id: Uuid, id: Uuid) -> Result<(), RecipeStoreError> {
        let existing = self.find_recipe(id).await?;
        if existing.user_id != user_id {
            return Err(RecipeStoreError::Forbidden);
        }

        if Recipe::delete(&self.db.pool, id).await? == 0 {
            return Err(RecipeStoreError::RecipeNotFound);
        }
        info!(recipe_id = %id, user_id = %user_id, "Recipe deleted");
        self.publish(StoreChange::Recipe {
            recipe_id: id,
            user_id,
        });
        Ok(())
    }

    pub async fn find_user(&self, id: Uuid) -> Result<UserProfile, RecipeStoreError> {
        UserProfile::find_by_id(&self.db.pool, id)
            .await?
            .ok_or(RecipeStoreError::UserNotFound)
    }

    pub async fn upsert_user(
        &self,
        id: Uuid,
        data: &UpsertUserProfile,
    ) -> Result<UserProfile, RecipeStoreError> {
        let profile = UserProfile::upsert(&self.db.pool, id, data).await?;
        self.publish(StoreChange::UserProfile { user_id: id });
        Ok(profile)
    }

    pub async fn request_follow(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
    ) -> Result<Relation, RecipeStoreError> {
        if from_user_id == to_user_id {
            return Err(RecipeStoreError::SelfFollow);
        }
        self.find_user(to_user_id).await?;

        let relation = Relation::request(&self.db.pool, from_user_id, to_user_id).await?;
        info!(relation_id = %relation.id, from_user_id = %from_user_id, to_user_id = %to_user_id, "Follow requested");
        self.publish(StoreChange::Relation {
            from_user_id,
            to_user_id,
        });
        Ok(relation)
    }

    /// Accept a follow request; only the followed user may confirm.
    pub async fn confirm_follow(
        &self,
        user_id: Uuid,
        relation_id: Uuid,
    ) -> Result<Relation, RecipeStoreError> {
        let relation = Relation::find_by_id(&self.db.pool, relation_id)
            .await?
            .ok_or(RecipeStoreError::RelationNotFound)?;
        if relation.to_user_id != user_id {
            return Err(RecipeStoreError::Forbidden);
        }

        let relation = Relation::confirm(&self.db.pool, relation_id)
            .await?
            .ok_or(RecipeStoreError::RelationNotFound)?;
        info!(relation_id = %relation_id, "Follow confirmed");
        self.publish(StoreChange::Relation {
            from_user_id: relation.from_user_id,
            to_user_id: relation.to_user_id,
        });
        Ok(relation)
    }

    /// Withdraw a request, unfollow, or remove a follower; either side may delete.
    pub async fn delete_relation(
        &self,
        user_id: Uuid,
        relation_id: Uuid,
    ) -> Result<(), RecipeStoreError> {
        let relation = Relation::find_by_id(&self.db.pool, relation_id)
            .await?
            .ok_or(RecipeStoreError::RelationNotFound)?;
        if relation.from_user_id != user_id && relation.to_user_id != user_id {
            return Err(RecipeStoreError::Forbidden);
        }

        Relation::delete(&self.db.pool, relation_id).await?;
        info!(relation_id = %relation_id, "Relation deleted");
        self.publish(StoreChange::Relation {
            from_user_id: relation.from_user_id,
            to_user_id: relation.to_user_id,
        });
        Ok(())
    }

    pub async fn pending_requests(&self, user_id: Uuid) -> Result<Vec<Relation>, RecipeStoreError> {
        Ok(Relation::find_pending_for(&self.db.pool, user_id).await?)
    }

    pub async fn followers(&self, user_id: Uuid) -> Result<Vec<Relation>, RecipeStoreError> {
        Ok(Relation::find_followers(&self.db.pool, user_id).await?)
    }

    pub async fn following(&self, user_id: Uuid) -> Result<Vec<Relation>, RecipeStoreError> {
        Ok(Relation::find_following(&self.db.pool, user_id).await?)
    }

    pub async fn following_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, RecipeStoreError> {
        Ok(Relation::find_confirmed_following_ids(&self.db.pool, user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use db::models::recipe::Ingredient;

    use super::*;

    fn new_recipe(title: &str) -> CreateRecipe {
        CreateRecipe {
            title: title.to_string(),
            description: Some("A weeknight staple".to_string()),
            author: None,
            plain: None,
            content: None,
            image: None,
            ingredients: vec![Ingredient {
                name: "salt".to_string(),
                amount: "a pinch".to_string(),
            }],
        }
    }

    async fn store_with_users(count: usize) -> (RecipeStore, Vec<Uuid>) {
        let store = RecipeStore::new(DBService::new_in_memory().await.unwrap());
        let mut users = Vec::new();
        for _ in 0..count {
            let id = Uuid::new_v4();
            store
                .upsert_user(id, &UpsertUserProfile::default())
                .await
                .unwrap();
            users.push(id);
        }
        (store, users)
    }

    #[tokio::test]
    async fn test_writes_publish_changes() {
        let (store, users) = store_with_users(1).await;
        let mut changes = store.subscribe_changes();

        let recipe = store.create_recipe(users[0], &new_recipe("Soup")).await.unwrap();
        assert_eq!(
            changes.recv().await.unwrap(),
            StoreChange::Recipe {
                recipe_id: recipe.id,
                user_id: users[0]
            }
        );

        store.delete_recipe(users[0], recipe.id).await.unwrap();
        assert!(matches!(
            changes.recv().await.unwrap(),
            StoreChange::Recipe { recipe_id, .. } if recipe_id == recipe.id
        ));
    }

    #[tokio::test]
    async fn test_only_owner_can_modify_recipe() {
        let (store, users) = store_with_users(2).await;
        let recipe = store.create_recipe(users[0], &new_recipe("Soup")).await.unwrap();

        let update = UpdateRecipe {
            title: Some("Stolen soup".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            store.update_recipe(users[1], recipe.id, &update).await,
            Err(RecipeStoreError::Forbidden)
        ));
        assert!(matches!(
            store.delete_recipe(users[1], recipe.id).await,
            Err(RecipeStoreError::Forbidden)
        ));

        let updated = store.update_recipe(users[0], recipe.id, &update).await.unwrap();
        assert_eq!(updated.title, "Stolen soup");
        assert!(updated.updated_at >= recipe.updated_at);
    }

    #[tokio::test]
    async fn test_follow_flow() {
        let (store, users) = store_with_users(2).await;
        let (alice, bob) = (users[0], users[1]);

        assert!(matches!(
            store.request_follow(alice, alice).await,
            Err(RecipeStoreError::SelfFollow)
        ));
        assert!(matches!(
            store.request_follow(alice, Uuid::new_v4()).await,
            Err(RecipeStoreError::UserNotFound)
        ));

        let request = store.request_follow(alice, bob).await.unwrap();
        assert_eq!(store.pending_requests(bob).await.unwrap().len(), 1);
        assert!(store.following_ids(alice).await.unwrap().is_empty());

        assert!(matches!(
            store.confirm_follow(alice, request.id).await,
            Err(RecipeStoreError::Forbidden)
        ));
        store.confirm_follow(bob, request.id).await.unwrap();
        assert_eq!(store.following_ids(alice).await.unwrap(), vec![bob]);
        assert_eq!(store.followers(bob).await.unwrap().len(), 1);
        assert_eq!(store.following(alice).await.unwrap().len(), 1);

        store.delete_relation(bob, request.id).await.unwrap();
        assert!(store.following_ids(alice).await.unwrap().is_empty());
        assert!(matches!(
            store.delete_relation(bob, request.id).await,
            Err(RecipeStoreError::RelationNotFound)
        ));
    }
}
