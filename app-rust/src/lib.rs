pub mod config;
mod encoding;
mod errors;
pub mod export;
pub mod generation;
mod id_utils;
pub mod orchestrator;
mod prompt;
pub mod render;
pub mod server;
pub mod session;

pub use config::{AppConfig, ConfigError};
pub use encoding::{encode_reader, strip_data_url_prefix, EncodedPayload, PDF_MEDIA_TYPE};
pub use errors::{BoxedError, VisualizerError};
pub use generation::{ProgressSink, Visualization, VisualizationClient};
pub use orchestrator::{GenerationJob, JobKind, Orchestrator, SessionView};
pub use session::Phase;
