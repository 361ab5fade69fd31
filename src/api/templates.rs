//! Judge template management API endpoints.
//!
//! - List templates
//! - Create template
//! - Get template details
//! - Overwrite template
//! - Delete template

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

use super::error::ApiError;
use super::routes::AppState;
use super::types::TemplateRequest;
use crate::template::{slugify, Template, TemplateSummary};

/// Create template routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_templates).post(create_template))
        .route(
            "/:id",
            get(get_template).put(update_template).delete(delete_template),
        )
}

/// GET /v1/config/judge_templates - List all templates.
async fn list_templates(State(state): State<Arc<AppState>>) -> Json<Vec<TemplateSummary>> {
    Json(state.templates.list().await)
}

/// POST /v1/config/judge_templates - Register a new template.
async fn create_template(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TemplateRequest>, JsonRejection>,
) -> Result<Json<Template>, ApiError> {
    let Json(req) = body?;
    let template = req.into_template(slugify);
    let created = state.templates.create(template).await?;
    Ok(Json(created))
}

/// GET /v1/config/judge_templates/:id - Get a template.
async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Template>, ApiError> {
    Ok(Json(state.templates.get(&id).await?))
}

/// PUT /v1/config/judge_templates/:id - Overwrite a template in place.
async fn update_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<TemplateRequest>, JsonRejection>,
) -> Result<Json<Template>, ApiError> {
    let Json(req) = body?;
    let template = req.into_template(|_| id.clone());
    let updated = state.templates.update(&id, template).await?;
    Ok(Json(updated))
}

/// DELETE /v1/config/judge_templates/:id - Delete a template.
async fn delete_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.templates.delete(&id).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Template {} deleted", id)
    })))
}
