mod handlers;

use std::num::NonZeroUsize;
use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::aggregator::Aggregation;
use crate::catalog::Catalog;
use crate::config::CatalogConfig;
use crate::sandbox::{ArtifactRegistry, DocumentBackend, SandboxManager};

pub use handlers::{ListComponentsQuery, OpenSandboxInput};

/// Shared state for every request. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    /// The index as it was read, served back to remote aggregators.
    pub index: Arc<Vec<String>>,
    /// Sandboxes opened through `/sandboxes`, on the configured backend.
    pub sandboxes: SandboxManager,
    /// Demo documents for `/library/{name}/{demo_file}`, delivered to a browser.
    pub documents: SandboxManager,
    pub manifest_file: String,
    pub demo_file: String,
    pub page_size: NonZeroUsize,
    pub max_page_size: NonZeroUsize,
    pub cors_origins: Option<Vec<String>>,
}

impl AppState {
    pub fn new(aggregation: Aggregation, config: &CatalogConfig) -> Self {
        let Aggregation { index, catalog, .. } = aggregation;
        let registry =
            ArtifactRegistry::from_catalog(&catalog, &config.content_root, &config.demo_file);
        let policy = config.sandbox_policy();

        Self {
            sandboxes: SandboxManager::new(
                registry.clone(),
                config.sandbox_backend(),
                policy.clone(),
            )
            .with_max_open(config.sandbox.max_open),
            documents: SandboxManager::new(registry, Arc::new(DocumentBackend), policy),
            catalog: Arc::new(catalog),
            index: Arc::new(index),
            manifest_file: config.manifest_file.clone(),
            demo_file: config.demo_file.clone(),
            page_size: config.page_size(),
            max_page_size: config.max_page_size(),
            cors_origins: config.server.cors_origins.clone(),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Catalog
        .route("/components", get(handlers::list_components))
        .route("/components/{name}", get(handlers::get_component))
        .route("/tags", get(handlers::list_tags))
        // Sandboxes
        .route("/sandboxes", post(handlers::open_sandbox))
        .route(
            "/sandboxes/{id}",
            get(handlers::get_sandbox).delete(handlers::close_sandbox),
        )
        // Health
        .route("/health", get(handlers::health));

    // Same layout as the content root, so another server can aggregate from us
    // and a browser can load demos where it expects them.
    let library = Router::new()
        .route("/components-list.json", get(handlers::components_list))
        .route("/library/{name}/{file}", get(handlers::library_file));

    let cors = cors_layer(state.cors_origins.as_deref());

    Router::new()
        .nest("/api/v1", api)
        .merge(library)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

fn cors_layer(origins: Option<&[String]>) -> CorsLayer {
    let Some(origins) = origins else {
        return CorsLayer::permissive();
    };

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}
