//! Login, logout, password reset and admin account management.

use axum::extract::{Extension, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use rand::Rng;
use tracing::{info, warn};
use visitlog_shared::api::{
    AdminDto, AdminReq, AuthReq, AuthResp, ForgotPasswordReq, MessageResp, ResetPasswordReq,
    SavedResp, VerifyCodeReq,
};
use visitlog_shared::auth::Role;
use visitlog_shared::domain::DEFAULT_ADMIN_IMAGE;
use visitlog_shared::jwt;

use super::auth::{self, AuthCtx};
use super::{ApiForm, ApiJson, ApiPath, AppError, AppState};
use crate::mail::RESET_CODE_TTL_MINUTES;
use crate::storage::accounts::ResetCodeCheck;
use crate::storage::models::{User, UserInput};

/// Failed verification attempts allowed per reset code.
const RESET_CODE_MAX_ATTEMPTS: i32 = 3;

pub async fn login_form(
    State(state): State<AppState>,
    ApiForm(body): ApiForm<AuthReq>,
) -> Result<Response, AppError> {
    login(&state, body).await
}

pub async fn login_json(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<AuthReq>,
) -> Result<Response, AppError> {
    login(&state, body).await
}

async fn login(state: &AppState, body: AuthReq) -> Result<Response, AppError> {
    let invalid = || AppError::Unauthorized("Invalid username or password.".into());
    let user = state
        .store
        .find_user_by_username(&body.username)
        .await?
        .ok_or_else(|| {
            warn!(username=%body.username, "login: unknown username");
            invalid()
        })?;
    if !verify_password(body.password, user.password_hash.clone()).await? {
        warn!(username=%body.username, "login: invalid password");
        return Err(invalid());
    }
    if !auth::is_admin(&user) {
        warn!(username=%user.username, role=%user.role, "login: account is not an admin");
        return Err(AppError::unauthorized());
    }
    let token = auth::issue_token_for_user(state, &user).await?;
    info!(username=%user.username, "login: session opened");
    let cookie = auth::session_cookie(&token);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(AuthResp {
            success: true,
            message: "Login successful!".into(),
            token,
        }),
    )
        .into_response())
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if let Some(token) = auth::session_token(&headers) {
        match jwt::decode_and_verify(&token, state.config.secret_key.as_bytes()) {
            Ok(claims) => {
                state.store.delete_session(&claims.jti).await?;
                info!(username=%claims.sub, "logout: session closed");
            }
            Err(e) => warn!(error=%e, "logout: ignoring unreadable token"),
        }
    }
    Ok((
        [(header::SET_COOKIE, auth::expired_session_cookie())],
        Json(MessageResp::ok("Logged out successfully!")),
    )
        .into_response())
}

pub async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ForgotPasswordReq>,
) -> Result<Json<MessageResp>, AppError> {
    let email = body.email.trim().to_string();
    if email.is_empty() {
        return Err(AppError::bad_request("Email is required"));
    }
    let generic =
        MessageResp::ok("If that email is registered, a verification code has been sent.");
    if state.store.find_user_by_email(&email).await?.is_none() {
        warn!(email=%email, "forgot_password: no account for address");
        return Ok(Json(generic));
    }

    let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
    state
        .store
        .put_reset_code(&email, &code, Utc::now().naive_utc())
        .await?;
    let mailer = state.mailer.clone();
    let (to, sent_code) = (email.clone(), code);
    let sent = tokio::task::spawn_blocking(move || mailer.send_reset_code(&to, &sent_code)).await?;
    if let Err(e) = sent {
        state.store.clear_reset_code(&email).await?;
        return Err(e.into());
    }
    info!(email=%email, "forgot_password: code issued");
    Ok(Json(generic))
}

pub async fn verify_code(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<VerifyCodeReq>,
) -> Result<Json<MessageResp>, AppError> {
    let check = state
        .store
        .verify_reset_code(
            &body.email,
            &body.code,
            Utc::now().naive_utc(),
            Duration::minutes(RESET_CODE_TTL_MINUTES),
            RESET_CODE_MAX_ATTEMPTS,
        )
        .await?;
    match check {
        ResetCodeCheck::Valid => Ok(Json(MessageResp::ok("Code verified successfully."))),
        ResetCodeCheck::Mismatch { remaining } => Err(AppError::bad_request(format!(
            "Invalid verification code. {remaining} attempts remaining."
        ))),
        ResetCodeCheck::Expired => Err(AppError::bad_request(
            "Verification code has expired. Please request a new one.",
        )),
        ResetCodeCheck::TooManyAttempts => Err(AppError::bad_request(
            "Too many failed attempts. Please request a new verification code.",
        )),
    }
}

pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ResetPasswordReq>,
) -> Result<Json<MessageResp>, AppError> {
    if body.password.is_empty() {
        return Err(AppError::bad_request("Password is required"));
    }
    if body.password != body.confirm_password {
        return Err(AppError::bad_request("Passwords do not match!"));
    }
    let consumed = state
        .store
        .consume_reset_code(
            &body.email,
            &body.code,
            Utc::now().naive_utc(),
            Duration::minutes(RESET_CODE_TTL_MINUTES),
        )
        .await?;
    if !consumed {
        return Err(AppError::bad_request(
            "Verification code is invalid or has expired. Please request a new one.",
        ));
    }
    let hash = hash_password(body.password).await?;
    if !state.store.set_password_for_email(&body.email, &hash).await? {
        return Err(AppError::not_found("No account is registered with that email."));
    }
    info!(email=%body.email.trim(), "reset_password: password replaced, sessions revoked");
    Ok(Json(MessageResp::ok(
        "Password reset successfully! Please log in with your new password.",
    )))
}

// Admin accounts

fn admin_dto(u: &User) -> AdminDto {
    AdminDto {
        id: u.id,
        username: u.username.clone(),
        email: u.email.clone(),
        first_name: u.first_name.clone(),
        last_name: u.last_name.clone(),
        phone: u.phone.clone(),
        role: u.role.parse().unwrap_or(Role::Staff),
        location_id: u.location_id,
        image: u.image.clone(),
    }
}

pub async fn list_admins(State(state): State<AppState>) -> Result<Json<Vec<AdminDto>>, AppError> {
    let users = state.store.list_users().await?;
    Ok(Json(users.iter().map(admin_dto).collect()))
}

pub async fn get_admin(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i32>,
) -> Result<Json<AdminDto>, AppError> {
    let user = state
        .store
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::not_found("Admin not found!"))?;
    Ok(Json(admin_dto(&user)))
}

/// Checks the password pair and hashes it. `None` when no new password was given.
async fn new_password_hash(
    password: Option<String>,
    confirm: Option<String>,
) -> Result<Option<String>, AppError> {
    let Some(password) = password.filter(|p| !p.is_empty()) else {
        return Ok(None);
    };
    if confirm.as_deref() != Some(password.as_str()) {
        return Err(AppError::bad_request("Passwords do not match!"));
    }
    Ok(Some(hash_password(password).await?))
}

pub async fn create_admin(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<AdminReq>,
) -> Result<(StatusCode, Json<SavedResp<AdminDto>>), AppError> {
    let password_hash = new_password_hash(body.password, body.confirm_password)
        .await?
        .ok_or_else(|| AppError::bad_request("Password is required"))?;
    let input = UserInput {
        username: body.username,
        email: body.email,
        first_name: body.first_name,
        last_name: body.last_name,
        phone: body.phone,
        password_hash: Some(password_hash),
        role: body.role.unwrap_or(Role::Admin).to_string(),
        location_id: body.location_id,
        image: body.image.or_else(|| Some(DEFAULT_ADMIN_IMAGE.to_string())),
    };
    let user = state.store.create_user(input).await?;
    info!(by=%auth.username, username=%user.username, "admin created");
    Ok((
        StatusCode::CREATED,
        Json(SavedResp::new("Admin registered successfully!", admin_dto(&user))),
    ))
}

pub async fn update_admin(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiPath(id): ApiPath<i32>,
    ApiJson(body): ApiJson<AdminReq>,
) -> Result<Json<SavedResp<AdminDto>>, AppError> {
    let current = state
        .store
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::not_found("Admin not found!"))?;
    if id == auth.user_id && body.role.is_some_and(|r| r != Role::Admin) {
        return Err(AppError::bad_request("You cannot remove your own admin role."));
    }
    let password_hash = new_password_hash(body.password, body.confirm_password).await?;
    let input = UserInput {
        username: body.username,
        email: body.email,
        first_name: body.first_name,
        last_name: body.last_name,
        phone: body.phone,
        password_hash,
        role: body.role.map(|r| r.to_string()).unwrap_or(current.role),
        location_id: body.location_id,
        image: body.image,
    };
    let user = state.store.update_user(id, input).await?;
    info!(by=%auth.username, username=%user.username, "admin updated");
    Ok(Json(SavedResp::new("Admin updated successfully!", admin_dto(&user))))
}

pub async fn delete_admin(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiPath(id): ApiPath<i32>,
) -> Result<Json<MessageResp>, AppError> {
    if id == auth.user_id {
        return Err(AppError::bad_request("You cannot delete your own account."));
    }
    let user = state
        .store
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::not_found("Admin not found!"))?;
    let username = user.username.clone();
    state.backups.snapshot(vec![user], state.local_now()).await?;
    state.store.delete_user(id).await?;
    info!(by=%auth.username, username=%username, "admin deleted");
    Ok(Json(MessageResp::ok(format!(
        "Admin {username} deleted successfully"
    ))))
}

async fn hash_password(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await?
        .map_err(AppError::internal)
}

async fn verify_password(password: String, hash: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await?
        .map_err(|e| {
            tracing::error!(error=%e, "login: bcrypt verify failed");
            AppError::internal(e)
        })
}
