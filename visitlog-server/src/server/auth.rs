use axum::http::{HeaderMap, Request, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use tracing::{error, warn};
use visitlog_shared::api::SESSION_COOKIE;
use visitlog_shared::auth::Role;
use visitlog_shared::jwt::{self, JwtClaims};

use super::{AppError, AppState};
use crate::storage::models::User;

/// Hours of inactivity before an admin session is considered expired.
const SESSION_IDLE_HOURS: i64 = 12;
/// Days before mandatory re-login.
pub const TOKEN_TTL_DAYS: i64 = 7;

#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub user_id: i32,
    pub username: String,
}

/// Session token from `Authorization: Bearer` or, failing that, the session cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(t) = bearer {
        return Some(t.to_string());
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

pub fn session_cookie(token: &str) -> String {
    format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        TOKEN_TTL_DAYS * 24 * 3600
    )
}

pub fn expired_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

pub async fn require_session(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(token) = session_token(req.headers()) else {
        return Err(AppError::unauthorized());
    };

    let claims = match jwt::decode_and_verify(&token, state.config.secret_key.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            warn!(error=%e, "auth: jwt decode failed");
            return Err(AppError::unauthorized());
        }
    };
    if claims.role != Role::Admin {
        warn!(username=%claims.sub, role=%claims.role, "auth: non-admin token");
        return Err(AppError::unauthorized());
    }

    let cutoff = Utc::now() - Duration::hours(SESSION_IDLE_HOURS);
    match state
        .store
        .touch_session_with_cutoff(&claims.jti, cutoff.naive_utc())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            warn!(
                jti = %claims.jti,
                username = %claims.sub,
                idle_hours = SESSION_IDLE_HOURS,
                "auth: session missing or idle"
            );
            return Err(AppError::unauthorized());
        }
        Err(e) => {
            error!(jti = %claims.jti, error=%e, "auth: touch_session_with_cutoff failed");
            return Err(AppError::internal(e));
        }
    }

    // The account may have been removed or demoted after the token was issued.
    let user = state.store.get_user(claims.uid).await?;
    match user {
        Some(u) if u.username == claims.sub && is_admin(&u) => {}
        _ => {
            warn!(uid = claims.uid, username = %claims.sub, "auth: account gone or no longer admin");
            return Err(AppError::unauthorized());
        }
    }

    req.extensions_mut().insert(AuthCtx {
        user_id: claims.uid,
        username: claims.sub,
    });
    Ok(next.run(req).await)
}

pub fn is_admin(user: &User) -> bool {
    user.role.parse::<Role>().ok() == Some(Role::Admin)
}

/// Opens a session row for `user` and returns the signed token.
pub async fn issue_token_for_user(state: &AppState, user: &User) -> Result<String, AppError> {
    if !is_admin(user) {
        warn!(username = %user.username, role = %user.role, "issue_token: not an admin");
        return Err(AppError::unauthorized());
    }
    let jti = uuid::Uuid::new_v4().to_string();
    let exp = (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).timestamp();
    let claims = JwtClaims {
        sub: user.username.clone(),
        jti: jti.clone(),
        exp,
        role: Role::Admin,
        uid: user.id,
    };

    state.store.create_session(&jti, user.id).await.map_err(|e| {
        error!(username = %user.username, error=%e, "login: create_session failed");
        AppError::internal(e)
    })?;
    jwt::encode(&claims, state.config.secret_key.as_bytes()).map_err(|e| {
        error!(username = %user.username, error=%e, "login: jwt encode failed");
        AppError::internal(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; visitlog_session=from-cookie"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("from-cookie"));
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn empty_cookie_is_no_session() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("visitlog_session="));
        assert_eq!(session_token(&headers), None);
        assert!(expired_session_cookie().contains("Max-Age=0"));
    }
}
