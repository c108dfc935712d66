// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{auth, playbook, progress, stats},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Learner-facing progress routes are open; learners are identified by `userId`.
/// * Definition management and reporting sit behind auth + admin middleware.
/// * Trace and CORS layers wrap everything.
pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let auth_routes = Router::new().route("/login", post(auth::login));

    let learner_routes = Router::new()
        .route("/public", get(playbook::list_public_playbooks))
        .route("/public/{slug}", get(playbook::get_public_playbook))
        .route("/categories", get(playbook::list_categories))
        .route("/{id}/progress", post(progress::get_or_create_progress))
        .route("/{id}/progress/reset", post(progress::reset_progress))
        .route("/{id}/progress/goto", post(progress::go_to_step))
        .route(
            "/{id}/progress/custom-page/{step_number}",
            put(progress::update_custom_page_progress),
        )
        .route(
            "/{id}/progress/{step_number}",
            put(progress::update_step_progress),
        );

    let admin_routes = Router::new()
        .route(
            "/",
            get(playbook::list_playbooks).post(playbook::create_playbook),
        )
        .route(
            "/{id}",
            get(playbook::get_playbook)
                .put(playbook::update_playbook)
                .delete(playbook::delete_playbook),
        )
        .route("/{id}/stats", get(stats::get_playbook_stats))
        .route("/{id}/download", get(stats::download_results))
        // Auth runs first, then the admin role check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/playbooks", learner_routes.merge(admin_routes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
