use crate::errors::{AppError, AppResult};
use crate::models::{StoredAsset, UploadAssetPayload};
use base64::Engine;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

static UNSAFE_NAME_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9._-]").expect("valid regex"));

const SIDECAR_EXTENSION: &str = "json";

/// File drive for order attachments: `<root>/<orderId>/<assetId>-<name>` plus
/// a `<assetId>.json` sidecar with the metadata.
#[derive(Debug, Clone)]
pub struct AssetDrive {
    root: PathBuf,
}

impl AssetDrive {
    pub fn new(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|error| AppError::Io(error.to_string()))?;
        Ok(Self { root })
    }

    pub fn upload(&self, payload: &UploadAssetPayload, max_bytes: u64, now: DateTime<Utc>) -> AppResult<StoredAsset> {
        if payload.order_id.trim().is_empty() {
            return Err(AppError::Validation("orderId is required".to_string()));
        }
        let bytes = decode_data_url(&payload.data_url)?;
        if bytes.len() as u64 > max_bytes {
            return Err(AppError::Validation(format!(
                "Asset is {} bytes; the limit is {} bytes",
                bytes.len(),
                max_bytes
            )));
        }

        let asset_id = Uuid::new_v4().simple().to_string();
        let file_name = sanitize_file_name(&payload.name);
        let dir = self.order_dir(&payload.order_id);
        fs::create_dir_all(&dir).map_err(|error| AppError::Io(error.to_string()))?;

        let path = dir.join(format!("{}-{}", asset_id, file_name));
        fs::write(&path, &bytes).map_err(|error| AppError::Io(error.to_string()))?;

        let mime_type = if payload.mime_type.trim().is_empty() {
            data_url_mime(&payload.data_url).unwrap_or("application/octet-stream").to_string()
        } else {
            payload.mime_type.trim().to_string()
        };
        let asset = StoredAsset {
            id: asset_id,
            order_id: payload.order_id.clone(),
            name: file_name,
            mime_type,
            size: bytes.len() as u64,
            path: path.to_string_lossy().to_string(),
            uploaded_at: now,
        };

        let sidecar = dir.join(format!("{}.{}", asset.id, SIDECAR_EXTENSION));
        if let Err(error) = fs::write(&sidecar, serde_json::to_vec_pretty(&asset)?) {
            let _ = fs::remove_file(&path);
            return Err(AppError::Io(error.to_string()));
        }

        tracing::info!(order_id = %asset.order_id, asset_id = %asset.id, size = asset.size, "asset stored");
        Ok(asset)
    }

    /// Assets of one order, newest first. Unreadable sidecars are skipped.
    pub fn list(&self, order_id: &str) -> AppResult<Vec<StoredAsset>> {
        let dir = self.order_dir(order_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut assets = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|error| AppError::Io(error.to_string()))? {
            let path = entry.map_err(|error| AppError::Io(error.to_string()))?.path();
            if path.extension().and_then(|value| value.to_str()) != Some(SIDECAR_EXTENSION) {
                continue;
            }
            match read_sidecar(&path) {
                Ok(asset) => assets.push(asset),
                Err(error) => tracing::warn!(path = %path.to_string_lossy(), error = %error, "skipping asset sidecar"),
            }
        }

        assets.sort_by(|left, right| {
            right
                .uploaded_at
                .cmp(&left.uploaded_at)
                .then_with(|| left.name.cmp(&right.name))
        });
        Ok(assets)
    }

    pub fn delete(&self, order_id: &str, asset_id: &str) -> AppResult<()> {
        if asset_id.is_empty() || UNSAFE_NAME_CHARS.is_match(asset_id) {
            return Err(AppError::Validation(format!("Invalid asset id {}", asset_id)));
        }
        let sidecar = self.order_dir(order_id).join(format!("{}.{}", asset_id, SIDECAR_EXTENSION));
        if !sidecar.exists() {
            return Err(AppError::NotFound(format!("Asset {} not found", asset_id)));
        }

        let asset = read_sidecar(&sidecar)?;
        let file = PathBuf::from(&asset.path);
        if file.starts_with(&self.root) && file.exists() {
            fs::remove_file(&file).map_err(|error| AppError::Io(error.to_string()))?;
        }
        fs::remove_file(&sidecar).map_err(|error| AppError::Io(error.to_string()))?;
        tracing::info!(order_id = %order_id, asset_id = %asset_id, "asset deleted");
        Ok(())
    }

    fn order_dir(&self, order_id: &str) -> PathBuf {
        self.root.join(sanitize_file_name(order_id))
    }
}

fn read_sidecar(path: &Path) -> AppResult<StoredAsset> {
    let raw = fs::read(path).map_err(|error| AppError::Io(error.to_string()))?;
    Ok(serde_json::from_slice(&raw)?)
}

pub fn decode_data_url(data_url: &str) -> AppResult<Vec<u8>> {
    let trimmed = data_url.trim();
    let payload = if trimmed.starts_with("data:") {
        let Some(index) = trimmed.find("base64,") else {
            return Err(AppError::Validation("Data URL is not base64 encoded".to_string()));
        };
        &trimmed[index + 7..]
    } else {
        trimmed
    };
    if payload.is_empty() {
        return Err(AppError::Validation("Asset payload is empty".to_string()));
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|error| AppError::Validation(format!("Invalid base64 payload: {}", error)))
}

fn data_url_mime(data_url: &str) -> Option<&str> {
    let rest = data_url.trim().strip_prefix("data:")?;
    let end = rest.find([';', ','])?;
    let mime = &rest[..end];
    (!mime.is_empty()).then_some(mime)
}

pub fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name.trim())
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or_default();
    let sanitized = UNSAFE_NAME_CHARS.replace_all(base, "_").to_string();
    let sanitized = sanitized.trim_start_matches('.').to_string();
    if sanitized.is_empty() {
        "arquivo".to_string()
    } else {
        sanitized
    }
}
