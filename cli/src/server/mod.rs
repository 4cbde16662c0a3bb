mod api;
mod pages;

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Request},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tera::Tera;
use tower_http::limit::RequestBodyLimitLayer;

use cookbook_core::db::Database;

const BODY_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Database>>,
    templates: Arc<Tera>,
}

impl AppState {
    fn new(db: Database) -> anyhow::Result<Self> {
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            templates: Arc::new(load_templates()?),
        })
    }

    /// Run a repository call on the blocking pool. The Postgres backend drives
    /// its own runtime, so it must never be called from an async worker.
    async fn with_db<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> cookbook_core::Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let result = tokio::task::spawn_blocking(move || {
            let db = db.lock().unwrap_or_else(PoisonError::into_inner);
            f(&db)
        })
        .await
        .context("database task panicked")?;
        result.map_err(ApiError::from)
    }

    fn render(&self, name: &str, context: &tera::Context) -> Result<Html<String>, ApiError> {
        let body = self
            .templates
            .render(name, context)
            .with_context(|| format!("failed to render {name}"))?;
        Ok(Html(body))
    }
}

fn load_templates() -> anyhow::Result<Tera> {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![
        ("base.html", include_str!("../../templates/base.html")),
        ("list.html", include_str!("../../templates/list.html")),
        ("form.html", include_str!("../../templates/form.html")),
        ("view.html", include_str!("../../templates/view.html")),
        ("status.html", include_str!("../../templates/status.html")),
        ("message.html", include_str!("../../templates/message.html")),
    ])
    .context("failed to load templates")?;
    Ok(tera)
}

// --- Error handling ---

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl ApiError {
    fn status_and_message(self) -> (StatusCode, String) {
        match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                tracing::error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<cookbook_core::Error> for ApiError {
    fn from(err: cookbook_core::Error) -> Self {
        use cookbook_core::Error;
        match err {
            Error::Validation(msg) => Self::BadRequest(msg),
            Error::UnsupportedImage(_) | Error::Image(_) => Self::BadRequest(err.to_string()),
            other => Self::Internal(other.into()),
        }
    }
}

/// Error wrapper for the HTML pages: same mapping, rendered as a small page.
struct PageError(ApiError);

impl From<ApiError> for PageError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let (status, message) = self.0.status_and_message();
        let body = format!(
            "<!doctype html><html><head><meta charset=\"utf-8\"><title>Cook Book</title></head>\
             <body><h1>{}</h1><p>{}</p><p><a href=\"/\">Back to the cook book</a></p></body></html>",
            status.canonical_reason().unwrap_or("Error"),
            tera::escape_html(&message),
        );
        (status, Html(body)).into_response()
    }
}

// --- Middleware ---

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static(
            "default-src 'none'; img-src 'self'; style-src 'unsafe-inline'; form-action 'self'",
        ),
    );
    response
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(pages::index))
        .route(
            "/recipes/new",
            get(pages::new_recipe_form).post(pages::submit_new_recipe),
        )
        .route("/recipes/{id}", get(pages::view_recipe))
        .route(
            "/recipes/{id}/edit",
            get(pages::edit_recipe_form).post(pages::submit_edit_recipe),
        )
        .route("/recipes/{id}/delete", post(pages::delete_recipe))
        .route("/recipes/{id}/image", get(pages::recipe_image))
        .route("/status", get(pages::status))
        .route("/status/self-test", post(pages::run_self_test))
        .route(
            "/api/recipes",
            get(api::list_recipes).post(api::create_recipe),
        )
        .route("/api/recipes/count", get(api::count_recipes))
        .route(
            "/api/recipes/{id}",
            get(api::get_recipe)
                .put(api::update_recipe)
                .delete(api::delete_recipe),
        )
        .route("/api/health", get(api::health))
        .route("/api/self-test", post(api::self_test))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

/// Build a multi-threaded runtime and serve until interrupted.
pub fn run(db: Database, port: u16, bind: &str) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(start_server(db, port, bind))
}

async fn start_server(db: Database, port: u16, bind: &str) -> anyhow::Result<()> {
    let engine = db.engine();
    let location = db.location();
    let state = AppState::new(db)?;
    let app = build_router(state);

    if bind != "127.0.0.1" && bind != "localhost" {
        tracing::warn!(
            bind,
            "listening beyond localhost with no authentication; anyone on your network can edit recipes"
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    tracing::info!(engine, %location, "serving cook book on http://{bind}:{port}");
    eprintln!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
