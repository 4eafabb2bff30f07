use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::catalog::{CatalogPage, CatalogQuery};
use crate::models::Manifest;
use crate::sandbox::{SandboxError, SandboxStatus};

// ============================================================
// Error Handling
// ============================================================

/// Log an internal error and return a sanitized response to the client.
fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!("Internal error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

fn not_found(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, e.to_string())
}

/// Setup faults on our side are a 500; a demo that would not load is reported
/// as such, naming the unit.
fn sandbox_error(unit: &str, e: SandboxError) -> (StatusCode, String) {
    match e {
        SandboxError::NotFound(_) => not_found(e),
        SandboxError::Capacity(_) => (StatusCode::TOO_MANY_REQUESTS, e.to_string()),
        SandboxError::Context(_) | SandboxError::Spawn { .. } => internal_error(e),
        e => {
            tracing::warn!(unit, error = %e, "Demo failed to load");
            (
                StatusCode::BAD_GATEWAY,
                format!("Component `{}` failed to load: {}", unit, e),
            )
        }
    }
}

// ============================================================
// Health
// ============================================================

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "components": state.catalog.len(),
    }))
}

// ============================================================
// Catalog
// ============================================================

#[derive(Debug, Default, Deserialize)]
pub struct ListComponentsQuery {
    #[serde(alias = "search")]
    pub q: Option<String>,
    pub tag: Option<String>,
    pub page: Option<usize>,
    #[serde(alias = "pageSize")]
    pub page_size: Option<usize>,
}

impl ListComponentsQuery {
    /// Missing or zero values take the server defaults; the page size is
    /// capped at the configured maximum.
    pub fn normalize(self, state: &AppState) -> CatalogQuery {
        let page_size = self
            .page_size
            .and_then(std::num::NonZeroUsize::new)
            .unwrap_or(state.page_size)
            .min(state.max_page_size);

        CatalogQuery {
            query: self.q.unwrap_or_default(),
            tag: self.tag.filter(|t| !t.is_empty()),
            page: self.page.filter(|p| *p > 0).unwrap_or(1),
            page_size,
        }
    }
}

pub async fn list_components(
    State(state): State<AppState>,
    Query(query): Query<ListComponentsQuery>,
) -> Json<CatalogPage> {
    let query = query.normalize(&state);
    Json(state.catalog.view(&query).to_page())
}

pub async fn get_component(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Manifest>, (StatusCode, String)> {
    state
        .catalog
        .lookup(&name)
        .cloned()
        .map(Json)
        .map_err(not_found)
}

pub async fn list_tags(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.catalog.tags().into_iter().map(String::from).collect())
}

// ============================================================
// Static library layout
// ============================================================

pub async fn components_list(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.index.as_ref().clone())
}

/// `/library/{name}/{file}`: the unit's manifest or its demo document,
/// under the configured file names.
pub async fn library_file(
    State(state): State<AppState>,
    Path((name, file)): Path<(String, String)>,
) -> Result<Response, (StatusCode, String)> {
    if file == state.manifest_file {
        get_component(State(state), Path(name))
            .await
            .map(IntoResponse::into_response)
    } else if file == state.demo_file {
        library_demo(&state, &name).await
    } else {
        Err(not_found(format!("{}/{} not found", name, file)))
    }
}

/// Serve a unit's demo document with browser sandbox headers.
async fn library_demo(state: &AppState, name: &str) -> Result<Response, (StatusCode, String)> {
    let rendered = state
        .documents
        .render(name)
        .await
        .map_err(|e| sandbox_error(name, e))?;

    let headers = [
        (header::CONTENT_TYPE, rendered.content_type),
        (
            header::CONTENT_SECURITY_POLICY,
            state.documents.policy().content_security_policy(),
        ),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
        (header::REFERRER_POLICY, "no-referrer".to_string()),
    ];
    Ok((headers, rendered.body).into_response())
}

// ============================================================
// Sandboxes
// ============================================================

#[derive(Debug, Deserialize)]
pub struct OpenSandboxInput {
    pub unit: String,
}

pub async fn open_sandbox(
    State(state): State<AppState>,
    Json(input): Json<OpenSandboxInput>,
) -> Result<(StatusCode, Json<SandboxStatus>), (StatusCode, String)> {
    state
        .sandboxes
        .open(&input.unit)
        .map(|status| (StatusCode::CREATED, Json(status)))
        .map_err(|e| sandbox_error(&input.unit, e))
}

pub async fn get_sandbox(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SandboxStatus>, (StatusCode, String)> {
    state
        .sandboxes
        .status(id)
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "Sandbox not found".to_string()))
}

pub async fn close_sandbox(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.sandboxes.close(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, "Sandbox not found".to_string()))
    }
}
