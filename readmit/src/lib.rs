//! # readmit: Readmission-Risk Prediction API
//!
//! `readmit` serves hospital-readmission risk scores over HTTP. Clinicians authenticate with an
//! identity and password, store patient records, and ask for predictions either for a stored
//! patient (the result is appended to that patient's history) or for an ad-hoc feature set.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the HTTP layer.
//! Records live either in process memory or in PostgreSQL behind the [`db::handlers::Store`]
//! traits. The model is a serialized logistic regression loaded once at startup and shared
//! read-only by every request.
//!
//! ### Request Flow
//!
//! Every request passes through, outermost first:
//!
//! 1. `TraceLayer` request spans
//! 2. CORS
//! 3. Prometheus request metrics, when enabled
//! 4. The per-client rate limiter ([`limits`]), which answers 429 once a client's window is full
//! 5. The request deadline ([`request_timeout`]), which answers 408 when a handler runs too long
//! 6. The handler, which resolves the bearer token into a
//!    [`CurrentUser`](api::models::users::CurrentUser) and checks its role
//!
//! ### Core Components
//!
//! - **API layer** ([`api`]): handlers and request/response models
//! - **Authentication** ([`auth`]): Argon2 password hashing and signed session tokens
//! - **Inference** ([`inference`]): model loading, scoring, banding and explanations
//! - **Persistence** ([`db`]): users, patient records and prediction history
//! - **Rate limiting** ([`limits`]): sliding-window counters in memory or Redis
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use readmit::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = readmit::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     readmit::telemetry::init_telemetry(config.log_format)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod inference;
pub mod limits;
mod openapi;
mod request_timeout;
pub mod telemetry;
mod types;

#[cfg(test)]
pub mod test_utils;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    http::{self, HeaderName, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    api::models::users::Role,
    auth::password,
    config::CorsOrigin,
    db::{handlers::Store, models::users::UserCreateDBRequest},
    inference::InferenceEngine,
    limits::{RateLimiter, rate_limit_middleware},
    openapi::ApiDoc,
    request_timeout::timeout_middleware,
};
pub use config::Config;
pub use types::{PatientId, PredictionId, UserId};

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .engine(engine)
///     .store(Arc::new(InMemoryStore::new()))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub engine: InferenceEngine,
    pub store: Arc<dyn Store>,
    /// `None` when rate limiting is disabled
    pub limiter: Option<Arc<RateLimiter>>,
}

/// Get the readmit database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create the administrator account, or reset its password and role if it already exists.
///
/// Called at startup when both `admin_identity` and `admin_password` are configured.
#[instrument(skip_all, fields(identity = %identity))]
pub async fn ensure_admin_user(store: &dyn Store, identity: &str, admin_password: &str, config: &Config) -> errors::Result<UserId> {
    password::check_identity(identity)?;
    if let Err(e) = password::check_policy(admin_password, &config.auth.password) {
        warn!("Configured admin password is weak: {e}");
    }

    let password_hash = password::hash_password(admin_password, config.auth.password.argon2_params())?;
    let user = store
        .upsert_user(&UserCreateDBRequest {
            id: uuid::Uuid::new_v4(),
            identity: identity.to_string(),
            password_hash,
            role: Role::Admin,
        })
        .await?;

    info!(user_id = %types::abbrev_uuid(&user.id), "Admin account ready");
    Ok(user.id)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    // A wildcard cannot appear inside an origin list
    let allow_origin = if config.cors.allowed_origins.contains(&CorsOrigin::Wildcard) {
        AllowOrigin::any()
    } else {
        let origins = config
            .cors
            .allowed_origins
            .iter()
            .map(|origin| origin.as_origin().parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(config.cors.allow_credentials)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .expose_headers([
            http::header::RETRY_AFTER,
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
        ]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// # Errors
///
/// Returns an error if the CORS configuration is invalid.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    use api::handlers::{auth, health, model, patients, predictions, users};

    let router = Router::new()
        .route("/health", get(health::health))
        // Authentication
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/me", get(auth::me))
        .route("/auth/change-password", post(auth::change_password))
        // Account administration
        .route("/users", get(users::list_users))
        .route("/users/{id}", axum::routing::delete(users::delete_user))
        // Patient records
        .route("/patients", get(patients::list_patients).post(patients::create_patient))
        .route(
            "/patients/{id}",
            get(patients::get_patient)
                .patch(patients::update_patient)
                .delete(patients::delete_patient),
        )
        .route("/patients/{id}/history", get(patients::get_history))
        // Scoring
        .route("/predict", post(predictions::predict))
        .route("/predictions/{id}", get(predictions::get_prediction))
        .route("/model", get(model::get_model))
        .with_state(state.clone())
        .route("/openapi.json", get(|| async { axum::Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(from_fn_with_state(state.config.request_timeout, timeout_middleware));

    let mut router = match &state.limiter {
        Some(limiter) => router.layer(from_fn_with_state(limiter.clone(), rate_limit_middleware)),
        None => router,
    };

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(create_cors_layer(&state.config)?).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Main application struct that owns all resources and the router.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] loads the model, connects the store (running migrations on
///    Postgres), seeds the admin account and starts the rate limiter
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown signal fires, background tasks are cancelled and the store
///    is closed
pub struct Application {
    router: Router,
    app_state: AppState,
    shutdown_token: CancellationToken,
    background_tasks: Vec<JoinHandle<()>>,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting readmit with configuration: {:#?}", config);

        // A missing or mismatched model is fatal
        let engine = InferenceEngine::load(&config.model.path, &config.model.version)?;

        let store = db::connect(&config.database).await?;

        if let (Some(identity), Some(admin_password)) = (&config.admin_identity, &config.admin_password) {
            ensure_admin_user(store.as_ref(), identity, admin_password, &config).await?;
        }

        let shutdown_token = CancellationToken::new();
        let mut background_tasks = Vec::new();

        let limiter = RateLimiter::from_config(&config.rate_limit).await?.map(Arc::new);
        if let Some(limiter) = &limiter {
            background_tasks.push(limiter.spawn_eviction(config.rate_limit.eviction_interval, shutdown_token.clone()));
        }

        let app_state = AppState::builder()
            .config(config)
            .engine(engine)
            .store(store)
            .maybe_limiter(limiter)
            .build();
        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            app_state,
            shutdown_token,
            background_tasks,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let config = &self.app_state.config;
        let bind_addr = config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "readmit listening on http://{}, API docs at http://localhost:{}/docs",
            bind_addr, config.port
        );

        // Peer addresses feed the rate limiter's client key
        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Stopping background tasks...");
        self.shutdown_token.cancel();
        for task in self.background_tasks {
            if let Err(e) = task.await {
                warn!("Background task failed during shutdown: {e}");
            }
        }

        info!("Closing store connections...");
        self.app_state.store.close().await;

        Ok(())
    }
}
