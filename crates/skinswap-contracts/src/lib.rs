pub mod aspect;
pub mod error;
pub mod events;
pub mod history;
pub mod image_data;
pub mod modes;
pub mod presets;
pub mod request;

pub use aspect::{classify_aspect_ratio, AspectRatio};
pub use error::{BackendError, BackendErrorKind, StudioError};
pub use image_data::ImageData;
pub use modes::{ItemStatus, StudioMode};
pub use request::{build_request, RequestPayload};
