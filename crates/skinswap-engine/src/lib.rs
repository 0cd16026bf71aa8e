mod backend;
mod dryrun;
mod gemini;
mod settings;
mod studio;

pub use backend::{default_backend_registry, BackendRegistry, ImageBackend};
pub use dryrun::DryrunBackend;
pub use gemini::GeminiBackend;
pub use settings::{StudioSettings, DEFAULT_BACKEND, DEFAULT_IMAGE_MODEL};
pub use studio::{image_dimensions, BatchOutcome, BatchPhase, BatchRequest, Studio};
