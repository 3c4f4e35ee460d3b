use std::path::PathBuf;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, header},
};
use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use uuid::Uuid;

use convene_types::api::UploadResponse;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// 10 MiB; larger bodies are refused by the route's body limit with 413.
pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

/// Local-disk image storage. Files are served back under `/uploads`.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
    public_base: String,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Writes the image under a fresh name and returns its public URL.
    pub async fn save(&self, content_type: Option<&str>, data: &[u8]) -> ApiResult<String> {
        let ext = content_type
            .and_then(image_extension)
            .ok_or_else(|| ApiError::invalid("Only JPEG, PNG, GIF and WebP images are accepted"))?;
        if data.is_empty() {
            return Err(ApiError::invalid("Empty upload"));
        }

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            error!("Failed to create upload directory {}: {}", self.dir.display(), e);
            ApiError::Internal(e.into())
        })?;

        let file_name = format!("{}.{}", Uuid::new_v4(), ext);
        let path = self.dir.join(&file_name);
        let mut file = tokio::fs::File::create(&path).await.map_err(|e| {
            error!("Failed to create file {}: {}", path.display(), e);
            ApiError::Internal(e.into())
        })?;
        file.write_all(data).await.map_err(|e| {
            error!("Failed to write file {}: {}", path.display(), e);
            ApiError::Internal(e.into())
        })?;
        file.flush().await.map_err(|e| ApiError::Internal(e.into()))?;

        info!("Stored image {} ({} bytes)", file_name, data.len());
        Ok(format!("{}/uploads/{}", self.public_base, file_name))
    }
}

fn image_extension(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
    match mime.as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// POST /api/upload-image with the raw image as the body.
pub async fn upload_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<UploadResponse>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let url = state.images.save(content_type, &body).await?;
    Ok(Json(UploadResponse { url }))
}
