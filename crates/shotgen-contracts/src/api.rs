use serde::{Deserialize, Serialize};

/// Square edge length used when the caller does not ask for one.
pub const DEFAULT_IMAGE_SIZE: u32 = 512;
pub const DEFAULT_SIZE_PARAM: &str = "512";
pub const SERVICE_MESSAGE: &str = "Product Shot Generator API";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub image_url: String,
}

impl GenerateResponse {
    pub fn ok(image_url: impl Into<String>) -> Self {
        Self {
            success: true,
            image_url: image_url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl ErrorResponse {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub message: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            message: SERVICE_MESSAGE.to_string(),
        }
    }
}
