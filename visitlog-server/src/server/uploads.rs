use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use tracing::info;
use uuid::Uuid;
use visitlog_shared::api::UploadResp;
use visitlog_shared::domain::{ALLOWED_IMAGE_EXTENSIONS, is_allowed_image};

use super::{AppError, AppState};

/// Accepts a multipart `image` field and stores it under the upload directory.
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResp>), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(e.body_text()))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let original = field.file_name().unwrap_or_default().to_string();
        if original.is_empty() {
            return Err(AppError::bad_request("No file selected"));
        }
        if !is_allowed_image(&original) {
            return Err(AppError::bad_request(format!(
                "File type not allowed. Allowed types: {}",
                ALLOWED_IMAGE_EXTENSIONS.join(", ")
            )));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?;

        let stored = stored_name(&original);
        tokio::fs::create_dir_all(&state.config.upload_dir)
            .await
            .map_err(AppError::internal)?;
        tokio::fs::write(state.config.upload_dir.join(&stored), &bytes)
            .await
            .map_err(AppError::internal)?;
        info!(original=%original, stored=%stored, size = bytes.len(), "image uploaded");
        return Ok((
            StatusCode::CREATED,
            Json(UploadResp {
                success: true,
                message: "Image uploaded successfully!".into(),
                filename: stored,
            }),
        ));
    }
    Err(AppError::bad_request("Missing 'image' file field"))
}

/// `<slug>-<8 hex>.<ext>`; only called with names that passed the allow-list.
fn stored_name(original: &str) -> String {
    let (stem, ext) = original.rsplit_once('.').unwrap_or((original, ""));
    let mut slug = slug::slugify(stem);
    if slug.is_empty() {
        slug = "image".to_string();
    }
    let tag = Uuid::new_v4().simple().to_string();
    format!("{slug}-{}.{}", &tag[..8], ext.to_ascii_lowercase())
}
