use std::{env, fs, path::PathBuf};

use db::models::{
    recipe::{CreateRecipe, Ingredient, Recipe, UpdateRecipe},
    relation::{CreateRelation, Relation},
    user_profile::{UpsertUserProfile, UserProfile},
};
use server::routes::feed::FeedSnapshot;
use services::services::search_key::SearchKey;
use ts_rs::TS;
use utils::response::ApiResponse;

fn generate_types_content() -> String {
    let header = "// This file was generated by `generate-types`. Do not edit it manually.";
    let decls = [
        ApiResponse::<()>::decl(),
        Ingredient::decl(),
        Recipe::decl(),
        CreateRecipe::decl(),
        UpdateRecipe::decl(),
        Relation::decl(),
        CreateRelation::decl(),
        UserProfile::decl(),
        UpsertUserProfile::decl(),
        SearchKey::decl(),
        FeedSnapshot::decl(),
    ];

    let body = decls
        .into_iter()
        .map(|decl| {
            let decl = decl.trim_start();
            if decl.starts_with("export") {
                decl.to_string()
            } else {
                format!("export {decl}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("{header}\n\n{body}\n")
}

fn main() -> anyhow::Result<()> {
    let out: PathBuf = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("shared/types.ts"));

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&out, generate_types_content())?;
    println!("Wrote {}", out.display());
    Ok(())
}
