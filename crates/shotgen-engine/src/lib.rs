//! Product shot generation engine.
//!
//! The pipeline turns one uploaded photo and a prompt into a stored,
//! provider-generated image:
//! - [`normalize`] crops the upload to a centred square PNG
//! - an [`ImageProvider`] (ModelsLab in production) produces the new image
//! - [`ProductShotPipeline`] sequences both and persists the files

pub mod error;
pub mod modelslab;
pub mod normalize;
pub mod pipeline;
pub mod provider;

pub use error::{GenerationError, NormalizeError, PipelineError};
pub use modelslab::{GenerationConfig, ModelsLabProvider, OutputRef};
pub use normalize::{normalize, MAX_IMAGE_SIZE};
pub use pipeline::{GeneratedShot, ProductShotPipeline, UploadedImage};
pub use provider::{DryrunProvider, ImageProvider};
