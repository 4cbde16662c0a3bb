//! JSON API under `/api`.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use cookbook_core::diagnostics::SelfTestReport;
use cookbook_core::models::{NewRecipe, Recipe, RecipeSummary, RecipeUpdate};

use super::{ApiError, AppState};

#[derive(Deserialize)]
pub(super) struct ListQuery {
    q: Option<String>,
    limit: Option<i64>,
}

#[derive(Deserialize)]
pub(super) struct UpdateRecipeRequest {
    #[serde(flatten)]
    update: RecipeUpdate,
    #[serde(default)]
    remove_image: bool,
}

fn not_found(id: i64) -> ApiError {
    ApiError::NotFound(format!("Recipe {id} not found"))
}

pub(super) async fn list_recipes(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RecipeSummary>>, ApiError> {
    let recipes = state
        .with_db(move |db| db.list(query.q.as_deref(), query.limit))
        .await?;
    Ok(Json(recipes))
}

pub(super) async fn create_recipe(
    State(state): State<AppState>,
    Json(req): Json<NewRecipe>,
) -> Result<(StatusCode, Json<Recipe>), ApiError> {
    let created = state
        .with_db(move |db| {
            let id = db.add(&req)?;
            db.get(id)
        })
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("created recipe vanished")))?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(super) async fn count_recipes(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let count = state.with_db(cookbook_core::Database::count).await?;
    Ok(Json(serde_json::json!({ "count": count })))
}

pub(super) async fn get_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Recipe>, ApiError> {
    let recipe = state
        .with_db(move |db| db.get(id))
        .await?
        .ok_or_else(|| not_found(id))?;
    Ok(Json(recipe))
}

pub(super) async fn update_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateRecipeRequest>,
) -> Result<Json<Recipe>, ApiError> {
    let mut update = req.update;
    if req.remove_image {
        update.keep_existing_image = false;
    }
    let updated = state
        .with_db(move |db| {
            if db.update(id, &update)? == 0 {
                return Ok(None);
            }
            db.get(id)
        })
        .await?
        .ok_or_else(|| not_found(id))?;
    Ok(Json(updated))
}

pub(super) async fn delete_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let existed = state
        .with_db(move |db| {
            let existed = db.get(id)?.is_some();
            db.delete(id)?;
            Ok(existed)
        })
        .await?;
    if !existed {
        return Err(not_found(id));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn health(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let status = state.with_db(|db| Ok(db.status())).await?;
    let code = if status.ping {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((
        code,
        Json(serde_json::json!({
            "ok": status.ping,
            "engine": status.backend.engine,
            "count": status.count,
        })),
    ))
}

pub(super) async fn self_test(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SelfTestReport>), ApiError> {
    let report = state.with_db(|db| Ok(db.self_test())).await?;
    let code = if report.ok {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((code, Json(report)))
}
