use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;
use tracing::{info, warn};
use visitlog_shared::api::{CheckInReq, CheckInResp};

use super::{ApiForm, ApiJson, AppError, AppState};
use crate::reports::TIMESTAMP_FORMAT;
use crate::storage::attendance::CheckInOutcome;

const UNKNOWN_ID_MESSAGE: &str = "No student ID number found. Please try again.";

#[derive(Debug, Deserialize)]
pub struct CheckInForm {
    #[serde(default)]
    id: String,
}

/// Page-style check-in: `POST /` with `id=` form body.
pub async fn checkin_form(
    State(state): State<AppState>,
    ApiForm(form): ApiForm<CheckInForm>,
) -> Result<(StatusCode, Json<CheckInResp>), AppError> {
    check_in(&state, &form.id).await
}

pub async fn checkin_json(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CheckInReq>,
) -> Result<(StatusCode, Json<CheckInResp>), AppError> {
    check_in(&state, &body.id).await
}

async fn check_in(
    state: &AppState,
    student_id: &str,
) -> Result<(StatusCode, Json<CheckInResp>), AppError> {
    let now = state.local_now();
    let outcome = state
        .store
        .check_in(student_id, now, state.config.one_checkin_per_day)
        .await?;
    let resp = match outcome {
        CheckInOutcome::Recorded { record, at } => {
            info!(student_id = %record.student.id, %at, "check-in recorded");
            (
                StatusCode::OK,
                CheckInResp {
                    success: true,
                    message: Some(format!("Welcome, {}!", record.student.first_name)),
                    student: Some((&record).into()),
                    login_time: Some(at.format(TIMESTAMP_FORMAT).to_string()),
                },
            )
        }
        CheckInOutcome::AlreadyCheckedIn { record, at } => {
            warn!(student_id = %record.student.id, first = %at, "check-in rejected: already in today");
            (
                StatusCode::CONFLICT,
                CheckInResp {
                    success: false,
                    message: Some(format!(
                        "You have already checked in today at {}.",
                        at.format("%I:%M %p")
                    )),
                    student: Some((&record).into()),
                    login_time: Some(at.format(TIMESTAMP_FORMAT).to_string()),
                },
            )
        }
        CheckInOutcome::UnknownStudent => {
            warn!(student_id = %student_id.trim(), "check-in rejected: unknown id");
            (
                StatusCode::NOT_FOUND,
                CheckInResp {
                    success: false,
                    message: Some(UNKNOWN_ID_MESSAGE.to_string()),
                    student: None,
                    login_time: None,
                },
            )
        }
    };
    Ok((resp.0, Json(resp.1)))
}
