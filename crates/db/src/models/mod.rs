pub mod recipe;
pub mod relation;
pub mod user_profile;
