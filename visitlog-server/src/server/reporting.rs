//! Dashboard JSON and file downloads (CSV, PDF, PNG).

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};
use visitlog_shared::api::{ChartQuery, DashboardDto, DashboardQuery, ExportQuery};
use visitlog_shared::domain::ChartKind;

use super::{ApiForm, ApiQuery, AppError, AppState};
use crate::reports::export::{self, ExportRow};
use crate::reports::{ReportWindow, TIMESTAMP_FORMAT, WindowParams, aggregate, chart, resolve_window};

pub async fn dashboard(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<DashboardQuery>,
) -> Result<Json<DashboardDto>, AppError> {
    let now = state.local_now();
    let window = resolve_window(
        WindowParams {
            filter: q.filter.as_deref(),
            start_date: q.start_date.as_deref(),
            end_date: q.end_date.as_deref(),
            ..Default::default()
        },
        now,
    )?;
    Ok(Json(
        aggregate::dashboard(&state.store, &window, q.course_id, now).await?,
    ))
}

async fn export_data(
    state: &AppState,
    q: &ExportQuery,
) -> Result<(ReportWindow, Vec<ExportRow>), AppError> {
    let window = resolve_window(
        WindowParams {
            filter: q.filter.as_deref(),
            start_date: q.start_date.as_deref(),
            end_date: q.end_date.as_deref(),
            start_time: q.start_time.as_deref(),
            end_time: q.end_time.as_deref(),
        },
        state.local_now(),
    )?;
    let visits = state
        .store
        .visits_between(window.start, window.end, q.course_id)
        .await?;
    let rows = export::export_rows(visits, q.unique_per_day.unwrap_or(false));
    info!(
        filter = %window.filter,
        start = %window.start,
        end = %window.end,
        rows = rows.len(),
        "export: rows selected"
    );
    Ok((window, rows))
}

fn attachment(content_type: &'static str, filename: &str, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment;filename={filename}"),
            ),
        ],
        body,
    )
        .into_response()
}

pub async fn export_csv(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<ExportQuery>,
) -> Result<Response, AppError> {
    let (_, rows) = export_data(&state, &q).await?;
    let bytes = tokio::task::spawn_blocking(move || export::attendance_csv(&rows)).await??;
    Ok(attachment(
        "text/csv; charset=utf-8",
        "attendance_data.csv",
        bytes,
    ))
}

pub async fn export_pdf(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<ExportQuery>,
) -> Result<Response, AppError> {
    let (window, rows) = export_data(&state, &q).await?;
    let label = format!(
        "Period: {} to {}",
        window.start.format(TIMESTAMP_FORMAT),
        window.end.format(TIMESTAMP_FORMAT)
    );
    let generated = state.local_now();
    let bytes =
        tokio::task::spawn_blocking(move || export::attendance_pdf(&rows, &label, generated))
            .await??;
    Ok(attachment("application/pdf", "attendance_data.pdf", bytes))
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

pub async fn download_chart(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<ChartQuery>,
) -> Result<Response, AppError> {
    render_chart(&state, q).await
}

/// Same as [`download_chart`] with the series in a urlencoded form body,
/// for blobs too large for a query string.
pub async fn download_chart_form(
    State(state): State<AppState>,
    ApiForm(q): ApiForm<ChartQuery>,
) -> Result<Response, AppError> {
    render_chart(&state, q).await
}

/// Renders a PNG chart from client-supplied series. `weekly_course_visits`
/// is always required; `monthly` also needs `monthly_data`, and `summary`
/// uses `monthly_data` plus optional `top_places`.
async fn render_chart(state: &AppState, q: ChartQuery) -> Result<Response, AppError> {
    let weekly_json = non_blank(q.weekly_course_visits)
        .ok_or_else(|| AppError::bad_request("Missing data parameter"))?;
    let weekly = chart::parse_series(&weekly_json, 7)?;
    let requested: ChartKind = q.kind.as_deref().unwrap_or_default().parse().unwrap_or_default();

    let mut title = "Weekly Course Visits".to_string();
    if let (Some(s), Some(e)) = (non_blank(q.start_date), non_blank(q.end_date)) {
        title.push_str(&format!(" ({s} to {e})"));
    }

    let (kind, png) = match requested {
        ChartKind::Weekly => (
            ChartKind::Weekly,
            tokio::task::spawn_blocking(move || chart::weekly_png(&weekly, &title)).await??,
        ),
        ChartKind::Monthly => {
            let monthly_json = non_blank(q.monthly_data)
                .ok_or_else(|| AppError::bad_request("Missing data parameter"))?;
            let monthly = chart::parse_series(&monthly_json, 12)?;
            (
                ChartKind::Monthly,
                tokio::task::spawn_blocking(move || {
                    chart::monthly_png(&monthly, "Monthly Visitor Comparison")
                })
                .await??,
            )
        }
        ChartKind::Summary => {
            let extras = non_blank(q.monthly_data)
                .ok_or_else(|| "monthly_data missing".to_string())
                .and_then(|m| chart::parse_series(&m, 12).map_err(|e| e.to_string()))
                .and_then(|monthly| {
                    let places = match non_blank(q.top_places) {
                        Some(p) => chart::parse_places(&p).map_err(|e| e.to_string())?,
                        None => Vec::new(),
                    };
                    Ok((monthly, places))
                });
            match extras {
                Ok((monthly, places)) => (
                    ChartKind::Summary,
                    tokio::task::spawn_blocking(move || {
                        chart::summary_png(&weekly, &monthly, &places)
                    })
                    .await??,
                ),
                Err(reason) => {
                    warn!(%reason, "chart: summary data unusable, rendering weekly chart");
                    (
                        ChartKind::Weekly,
                        tokio::task::spawn_blocking(move || chart::weekly_png(&weekly, &title))
                            .await??,
                    )
                }
            }
        }
    };

    let filename = format!(
        "{}_{}.png",
        chart::file_stem(kind),
        state.local_now().format("%Y%m%d_%H%M%S")
    );
    info!(kind = ?kind, bytes = png.len(), %filename, "chart rendered");
    Ok(attachment("image/png", &filename, png))
}
