//! API router.
//!
//! Returns a composable `Router` with the REST API nested under `/api/`,
//! the server-rendered pages under `/web/`, and `/healthz`.
//!
//! Middleware stack for `/api` (outermost → innermost):
//! 1. Auth (injects `Requester`) → 2. Audit logger

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::config::AppConfig;

/// Build the full application router from configuration.
pub fn app_router(config: AppConfig) -> Router {
    build_router(ApiContext::new(config))
}

/// Build router from a pre-constructed `ApiContext`.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
/// Path params use `:param` syntax (matchit 0.7 / axum 0.7).
pub fn build_router(ctx: ApiContext) -> Router {
    let api = Router::new()
        // Tokens
        .route("/token", post(endpoints::auth::token))
        .route("/token/refresh", post(endpoints::auth::refresh))
        .route("/logout", post(endpoints::auth::logout))
        // Accounts
        .route("/users", get(endpoints::users::list).post(endpoints::users::register))
        .route("/users/me", get(endpoints::users::me))
        .route("/users/change_password", post(endpoints::users::change_password))
        .route(
            "/users/:id",
            get(endpoints::users::retrieve)
                .put(endpoints::users::update)
                .patch(endpoints::users::update)
                .delete(endpoints::users::destroy),
        )
        // Role profiles
        .route(
            "/patients",
            get(endpoints::profiles::list_patients).post(endpoints::profiles::create_patient),
        )
        .route(
            "/patients/:id",
            get(endpoints::profiles::retrieve_patient)
                .put(endpoints::profiles::update_patient)
                .patch(endpoints::profiles::update_patient)
                .delete(endpoints::profiles::destroy_patient),
        )
        .route(
            "/doctors",
            get(endpoints::profiles::list_doctors).post(endpoints::profiles::create_doctor),
        )
        .route(
            "/doctors/:id",
            get(endpoints::profiles::retrieve_doctor)
                .put(endpoints::profiles::update_doctor)
                .patch(endpoints::profiles::update_doctor)
                .delete(endpoints::profiles::destroy_doctor),
        )
        .route(
            "/health",
            get(endpoints::profiles::list_health).post(endpoints::profiles::create_health),
        )
        .route("/health/summary", get(endpoints::profiles::health_summary))
        .route(
            "/health/:id",
            get(endpoints::profiles::retrieve_health)
                .put(endpoints::profiles::update_health)
                .patch(endpoints::profiles::update_health)
                .delete(endpoints::profiles::destroy_health),
        )
        // Family contacts
        .route(
            "/family-members",
            get(endpoints::family::list).post(endpoints::family::create),
        )
        .route(
            "/family-members/:id",
            get(endpoints::family::retrieve)
                .put(endpoints::family::update)
                .patch(endpoints::family::update)
                .delete(endpoints::family::destroy),
        )
        .nest("/medications", medication_routes())
        .with_state(ctx.clone())
        // Middleware stack (innermost first, outermost last):
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::middleware::from_fn(middleware::auth::identify))
        // Extension must be outermost so middleware can extract ApiContext
        .layer(axum::Extension(ctx.clone()));

    let health = Router::new()
        .route("/healthz", get(endpoints::health::check))
        .with_state(ctx.clone());

    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(Any);

    Router::new()
        .nest("/api", api)
        .nest("/web", crate::web::router(ctx))
        .merge(health)
        .layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
}

fn medication_routes() -> Router<ApiContext> {
    use endpoints::{catalog, medications, prescriptions};

    Router::new()
        .route("/catalog", get(catalog::search).post(catalog::create_medication))
        .route(
            "/patient-medications",
            get(medications::list).post(medications::create),
        )
        .route("/patient-medications/active", get(medications::active))
        .route("/patient-medications/expired", get(medications::expired))
        .route(
            "/patient-medications/:id",
            get(medications::retrieve)
                .put(medications::update)
                .patch(medications::update)
                .delete(medications::destroy),
        )
        .route("/patient-medications/:id/deactivate", post(medications::deactivate))
        .route("/patient-medications/:id/refill", post(medications::refill))
        .route(
            "/reminders",
            get(medications::list_reminders).post(medications::create_reminder),
        )
        .route("/reminders/today", get(medications::todays_reminders))
        .route(
            "/reminders/:id",
            get(medications::retrieve_reminder)
                .put(medications::update_reminder)
                .patch(medications::update_reminder)
                .delete(medications::destroy_reminder),
        )
        .route("/reminders/:id/trigger", post(medications::trigger_reminder))
        .route("/logs", get(medications::list_logs).post(medications::create_log))
        .route("/logs/today", get(medications::todays_logs))
        .route("/logs/manual", post(medications::log_manual))
        .route(
            "/logs/:id",
            get(medications::retrieve_log).delete(medications::destroy_log),
        )
        .route("/check", post(medications::check))
        .route("/adherence", get(medications::adherence))
        .route(
            "/prescriptions",
            get(prescriptions::list).post(prescriptions::create),
        )
        .route(
            "/prescriptions/:id",
            get(prescriptions::retrieve)
                .put(prescriptions::update)
                .patch(prescriptions::update)
                .delete(prescriptions::destroy),
        )
        .route("/prescriptions/:id/safety_scan", post(prescriptions::safety_scan))
        .route(
            "/interactions",
            get(catalog::list_interactions).post(catalog::create_interaction),
        )
        .route("/interactions/check", get(catalog::check_interaction))
        .route("/interactions/:id", get(catalog::retrieve_interaction))
}
