//! OCR over images sent by the extension.
//!
//! Images arrive as base64 or `data:` URLs. They are decoded and re-encoded to
//! PNG before being handed to an external OCR binary, which is invoked as
//! `<binary> --image <path> --json` and answers with `{"text": ..., "confidence": ...}`
//! or `{"error": ...}`.

use super::FeatureModule;
use crate::error::GenerationError;
use crate::models::now_rfc3339;
use async_trait::async_trait;
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub text: String,
    pub confidence: f64,
    pub language: String,
    pub processed_at: String,
}

#[async_trait]
pub trait OcrProcessor: FeatureModule {
    async fn process_image(&self, image_data: &str) -> Result<OcrResult, GenerationError>;
}

/// Decode a base64 payload, with or without a `data:<mime>;base64,` prefix
pub fn decode_image_data(image_data: &str) -> Result<DynamicImage, GenerationError> {
    let payload = match image_data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => image_data,
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| GenerationError::InvalidImage(e.to_string()))?;

    image::load_from_memory(&bytes).map_err(|e| GenerationError::InvalidImage(e.to_string()))
}

/// Runs an external OCR binary per image
pub struct CommandOcr {
    binary_path: PathBuf,
}

impl CommandOcr {
    pub fn new() -> Self {
        Self {
            binary_path: Self::default_binary_path(),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { binary_path: path }
    }

    fn default_binary_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        let paths = [
            exe_dir.join("ocr-extractor"),
            PathBuf::from("/usr/local/bin/ocr-extractor"),
            PathBuf::from("/usr/bin/ocr-extractor"),
        ];

        paths
            .into_iter()
            .find(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from("ocr-extractor"))
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    pub fn is_available(&self) -> bool {
        let exists = self.binary_path.exists();
        if !exists {
            debug!("OCR binary not found at: {}", self.binary_path.display());
        }
        exists
    }

    async fn run(&self, path: &Path) -> Result<OcrResult, GenerationError> {
        let output = Command::new(&self.binary_path)
            .arg("--image")
            .arg(path)
            .arg("--json")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("OCR failed: {}", stderr);
            return Err(GenerationError::Ocr(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let result: serde_json::Value = serde_json::from_str(&stdout)
            .map_err(|e| GenerationError::Ocr(format!("Failed to parse output: {}", e)))?;

        if let Some(error) = result["error"].as_str() {
            return Err(GenerationError::Ocr(error.to_string()));
        }

        Ok(OcrResult {
            text: result["text"].as_str().unwrap_or("").to_string(),
            confidence: result["confidence"].as_f64().unwrap_or(0.85),
            language: result["language"].as_str().unwrap_or("en").to_string(),
            processed_at: now_rfc3339(),
        })
    }
}

impl Default for CommandOcr {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeatureModule for CommandOcr {
    fn name(&self) -> &'static str {
        "ocr processor"
    }

    async fn initialize(&self) -> Result<(), String> {
        if self.is_available() {
            Ok(())
        } else {
            Err(format!(
                "OCR binary not found at {}",
                self.binary_path.display()
            ))
        }
    }
}

#[async_trait]
impl OcrProcessor for CommandOcr {
    async fn process_image(&self, image_data: &str) -> Result<OcrResult, GenerationError> {
        let image = decode_image_data(image_data)?;
        debug!("OCR input {}x{}", image.width(), image.height());

        let temp_path =
            std::env::temp_dir().join(format!("study_ocr_{}.png", uuid::Uuid::new_v4()));
        image
            .save_with_format(&temp_path, ImageFormat::Png)
            .map_err(|e| GenerationError::InvalidImage(format!("Failed to save temp image: {}", e)))?;

        let result = self.run(&temp_path).await;
        let _ = std::fs::remove_file(&temp_path);

        if let Ok(ocr) = &result {
            info!("OCR extracted {} chars (confidence {:.2})", ocr.text.len(), ocr.confidence);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_base64() -> String {
        let image = DynamicImage::new_rgb8(4, 4);
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn test_decode_plain_and_data_url() {
        let encoded = png_base64();
        assert_eq!(decode_image_data(&encoded).unwrap().width(), 4);

        let data_url = format!("data:image/png;base64,{}", encoded);
        assert_eq!(decode_image_data(&data_url).unwrap().height(), 4);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_image_data("not base64 at all!"),
            Err(GenerationError::InvalidImage(_))
        ));
        let not_an_image = base64::engine::general_purpose::STANDARD.encode(b"hello");
        assert!(decode_image_data(&not_an_image).is_err());
    }

    #[tokio::test]
    async fn test_initialize_fails_without_binary() {
        let ocr = CommandOcr::with_path(PathBuf::from("/nonexistent/ocr-extractor"));
        let err = ocr.initialize().await.unwrap_err();
        assert!(err.contains("/nonexistent/ocr-extractor"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_image_with_script() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-ocr");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '{\"text\": \"Hello from OCR\", \"confidence\": 0.9}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let ocr = CommandOcr::with_path(script);
        ocr.initialize().await.unwrap();
        let result = ocr.process_image(&png_base64()).await.unwrap();
        assert_eq!(result.text, "Hello from OCR");
        assert_eq!(result.language, "en");
    }
}
