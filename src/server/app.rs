use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use super::handlers::{health, mutate, pull};
use crate::services::{ChangeNotifier, MutationService, PullService};

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub notifier: Arc<dyn ChangeNotifier>,
    pub page_size: u64,
}

impl AppState {
    pub fn new(db: DatabaseConnection, notifier: Arc<dyn ChangeNotifier>, page_size: u64) -> Self {
        Self {
            db,
            notifier,
            page_size,
        }
    }

    pub fn mutations(&self) -> MutationService {
        MutationService::new(self.db.clone(), Arc::clone(&self.notifier))
    }

    pub fn pulls(&self) -> PullService {
        PullService::with_page_size(self.db.clone(), self.page_size)
    }
}

pub fn create_app(state: AppState, cors_origin: Option<&str>) -> Result<Router> {
    let cors = match cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<axum::http::HeaderValue>()?)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/v1", api_v1_routes())
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(state);

    Ok(app)
}

fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/pull", get(pull::pull))
        .route("/mutate/create", post(mutate::create))
        .route("/mutate/update", post(mutate::update))
        .route("/mutate/delete", post(mutate::delete))
        .route("/mutate/createNewIssue", post(mutate::create_new_issue))
}
