use std::path::PathBuf;
use std::sync::Arc;

use shotgen_contracts::api::DEFAULT_SIZE_PARAM;
use shotgen_contracts::ids::RequestId;
use shotgen_contracts::storage::StorageLayout;

use crate::error::PipelineError;
use crate::normalize::normalize;
use crate::provider::ImageProvider;

/// One uploaded file, fully read into memory.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

impl UploadedImage {
    pub fn new(bytes: Vec<u8>, content_type: Option<String>) -> Self {
        Self {
            bytes,
            content_type,
            file_name: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedShot {
    pub request_id: RequestId,
    pub original_path: PathBuf,
    pub generated_path: PathBuf,
    pub image_url: String,
}

pub struct ProductShotPipeline {
    layout: StorageLayout,
    provider: Arc<dyn ImageProvider>,
}

impl ProductShotPipeline {
    pub fn new(layout: StorageLayout, provider: Arc<dyn ImageProvider>) -> Self {
        Self { layout, provider }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run one request end to end.
    ///
    /// The original upload is stored before the provider is called, so a
    /// failed generation leaves the original behind and no generated file.
    pub fn handle(
        &self,
        upload: UploadedImage,
        prompt: &str,
        size_param: Option<&str>,
    ) -> Result<GeneratedShot, PipelineError> {
        ensure_image_content_type(upload.content_type.as_deref())?;

        let request_id = RequestId::new();
        let size = parse_size_param(size_param)?;
        tracing::info!(
            request_id = %request_id,
            upload_bytes = upload.bytes.len(),
            file_name = upload.file_name.as_deref().unwrap_or(""),
            size,
            "processing product shot"
        );

        let normalized = normalize(&upload.bytes, size)?;
        let original_path = self
            .layout
            .write_original(&request_id, &upload.bytes)
            .map_err(PipelineError::Storage)?;
        tracing::debug!(request_id = %request_id, path = %original_path.display(), "stored original");

        let generated = self.provider.generate(&normalized, prompt, size)?;
        let generated_path = self
            .layout
            .write_generated(&request_id, &generated)
            .map_err(PipelineError::Storage)?;
        tracing::info!(
            request_id = %request_id,
            provider = self.provider.name(),
            generated_bytes = generated.len(),
            path = %generated_path.display(),
            "stored generated image"
        );

        Ok(GeneratedShot {
            image_url: self.layout.public_url(&request_id),
            request_id,
            original_path,
            generated_path,
        })
    }
}

pub fn is_image_content_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|value| value.starts_with("image/"))
}

pub fn ensure_image_content_type(content_type: Option<&str>) -> Result<(), PipelineError> {
    if is_image_content_type(content_type) {
        Ok(())
    } else {
        Err(PipelineError::not_an_image())
    }
}

/// Square edge requested by the caller; `None` means the default.
pub fn parse_size_param(raw: Option<&str>) -> Result<u32, PipelineError> {
    let raw = raw.unwrap_or(DEFAULT_SIZE_PARAM);
    raw.trim()
        .parse::<u32>()
        .map_err(|source| PipelineError::InvalidSizeParam {
            raw: raw.to_string(),
            source,
        })
}
