//! Client side of an image thumbnailing service: upload an image, then poll until the
//! generated thumbnails are available.
//!
//! [`ProcessingCoordinator`] is the entry point. It is built from two [`AsyncTask`]s
//! (submit and fetch) and an [`IntervalRunner`] that polls while a submission is
//! outstanding.
pub mod api;
pub mod async_task;
pub mod config;
pub mod error;
pub mod interval;
pub mod processor;
pub mod utils;

pub use api::{ImageUpload, ProcessingApi, ResultPayload, SubmitResult, ThumbnailClient};
pub use async_task::{AsyncState, AsyncTask, Status};
pub use config::{Config, ConfigProvider, ConfigSource};
pub use error::ApiError;
pub use interval::IntervalRunner;
pub use processor::{ProcessingCoordinator, ProcessingPhase, ProcessingView};
