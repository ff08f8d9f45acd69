mod account;
pub mod auth;
mod checkin;
pub mod config;
mod records;
mod reporting;
mod uploads;

use std::sync::Arc;

use crate::backup::{BackupError, BackupWriter};
use crate::mail::{MailError, Mailer};
use crate::reports::ReportError;
use crate::server::auth::AuthCtx;
use crate::storage::{StorageError, Store};
use axum::extract::rejection::{FormRejection, JsonRejection, PathRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Form, FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    http::{Method, StatusCode, header},
    routing::{delete, get, post},
};
use chrono::{NaiveDateTime, Utc};
pub use config::{AppConfig, ConfigError};
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;
use visitlog_shared::api::{self, MessageResp};

/// Upper bound for multipart image uploads.
const UPLOAD_BODY_LIMIT: usize = 8 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Store,
    pub mailer: Arc<dyn Mailer>,
    pub backups: BackupWriter,
    tz: chrono_tz::Tz,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Store,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, ConfigError> {
        let tz = config.tz()?;
        let backups = BackupWriter::new(config.backup_dir.clone());
        Ok(Self {
            config: Arc::new(config),
            store,
            mailer,
            backups,
            tz,
            shutdown: CancellationToken::new(),
        })
    }

    /// Current wall-clock time in the configured timezone. Attendance rows
    /// and report windows use this clock.
    pub fn local_now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.tz).naive_local()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin", get(reporting::dashboard))
        .route("/api/v1/dashboard", get(reporting::dashboard))
        .route(
            "/admin/manage_students",
            get(records::list_students).post(records::create_student),
        )
        .route(
            "/api/v1/students",
            get(records::list_students).post(records::create_student),
        )
        .route(
            "/api/v1/students/{id}",
            get(records::get_student)
                .put(records::update_student)
                .delete(records::delete_student),
        )
        .route("/admin/delete_student/{id}", delete(records::delete_student))
        .route(
            "/admin/manage_courses",
            get(records::list_courses).post(records::create_course),
        )
        .route(
            "/api/v1/courses",
            get(records::list_courses).post(records::create_course),
        )
        .route(
            "/api/v1/courses/{id}",
            get(records::get_course)
                .put(records::update_course)
                .delete(records::delete_course),
        )
        .route("/admin/delete_course/{id}", delete(records::delete_course))
        .route(
            "/admin/manage_admins",
            get(account::list_admins).post(account::create_admin),
        )
        .route(
            "/api/v1/admins",
            get(account::list_admins).post(account::create_admin),
        )
        .route(
            "/api/v1/admins/{id}",
            get(account::get_admin)
                .put(account::update_admin)
                .delete(account::delete_admin),
        )
        .route(
            "/api/locations",
            get(records::list_locations).post(records::create_location),
        )
        .route(
            "/api/v1/locations",
            get(records::list_locations).post(records::create_location),
        )
        .route(
            "/api/v1/locations/{id}",
            get(records::get_location)
                .put(records::update_location)
                .delete(records::delete_location),
        )
        .route(
            "/api/v1/uploads",
            post(uploads::upload_image).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/export/csv", get(reporting::export_csv))
        .route("/api/v1/export/csv", get(reporting::export_csv))
        .route("/export/pdf", get(reporting::export_pdf))
        .route("/api/v1/export/pdf", get(reporting::export_pdf))
        .route(
            "/download_graph",
            get(reporting::download_chart).post(reporting::download_chart_form),
        )
        .route(
            "/api/v1/charts",
            get(reporting::download_chart).post(reporting::download_chart_form),
        )
        .route_layer(middleware::from_fn(set_auth_span_fields))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            username = tracing::field::Empty,
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/v1/version", get(version))
        .route("/", post(checkin::checkin_form))
        .route("/api/v1/checkin", post(checkin::checkin_json))
        .route("/admin/login", post(account::login_form))
        .route("/api/v1/auth/login", post(account::login_json))
        .route("/api/v1/auth/logout", post(account::logout))
        .route("/api/v1/auth/forgot-password", post(account::forgot_password))
        .route("/api/v1/auth/verify-code", post(account::verify_code))
        .route("/api/v1/auth/reset-password", post(account::reset_password))
        .nest_service("/uploads", ServeDir::new(&state.config.upload_dir))
        .merge(admin)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn version() -> Json<api::VersionDto> {
    Json(api::VersionDto {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let path = req.uri().path().to_string();
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("SAMEORIGIN"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-opener-policy"),
        HeaderValue::from_static("same-origin"),
    );

    // Session-bound data must never be cached; uploaded images may be.
    if !path.starts_with("/uploads/") {
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    }

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        Span::current().record("username", tracing::field::display(&auth.username));
    }
    Ok(next.run(req).await)
}

/// `Json` extractor whose rejections use the API error body.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(AppError::bad_request(rejection.body_text())),
        }
    }
}

/// `Form` extractor whose rejections use the API error body.
pub struct ApiForm<T>(pub T);

impl<S, T> FromRequest<S> for ApiForm<T>
where
    Form<T>: FromRequest<S, Rejection = FormRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Form::<T>::from_request(req, state).await {
            Ok(Form(value)) => Ok(ApiForm(value)),
            Err(rejection) => Err(AppError::bad_request(rejection.body_text())),
        }
    }
}

pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(rejection) => Err(AppError::bad_request(rejection.body_text())),
        }
    }
}

pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    Path<T>: FromRequestParts<S, Rejection = PathRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(ApiPath(value)),
            Err(rejection) => Err(AppError::bad_request(rejection.body_text())),
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn unauthorized() -> Self {
        Self::Unauthorized("Unauthorized access! Admins only.".into())
    }
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn conflict<T: Into<String>>(msg: T) -> Self {
        Self::Conflict(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(m) => AppError::NotFound(m),
            StorageError::Conflict(m) => AppError::Conflict(m),
            StorageError::InvalidInput(m) => AppError::BadRequest(m),
            other => AppError::internal(other),
        }
    }
}

impl From<ReportError> for AppError {
    fn from(e: ReportError) -> Self {
        if e.is_client_error() {
            AppError::BadRequest(e.to_string())
        } else {
            AppError::internal(e)
        }
    }
}

impl From<BackupError> for AppError {
    fn from(e: BackupError) -> Self {
        AppError::internal(format!("backup failed: {e}"))
    }
}

impl From<MailError> for AppError {
    fn from(e: MailError) -> Self {
        AppError::internal(format!("mail failed: {e}"))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(e: tokio::task::JoinError) -> Self {
        AppError::internal(e)
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m, "unauthorized", None),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m, "conflict", None),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error. Please try again later.".to_string(),
                "internal",
                Some(m),
            ),
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else if status.is_client_error() {
            tracing::warn!(status = %status, kind = kind, message = %msg, "request rejected");
        }
        let body = Json(MessageResp {
            success: false,
            message: msg,
        });
        (status, body).into_response()
    }
}
