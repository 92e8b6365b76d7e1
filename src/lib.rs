pub mod assets;
pub mod audio_io;
pub mod config;
pub mod error;
pub mod gauge;
pub mod graph;
pub mod loader;
pub mod logging;
pub mod mixer;
pub mod models;
pub mod session;
pub mod timeline;

pub use config::EngineConfig;
pub use error::EngineError;
pub use graph::{AudioGraph, GraphCommand, OfflineGraph};
pub use models::{Catalog, Stage, TrackRole, TrackSet};
pub use session::{RendererFrame, SessionEngine};
