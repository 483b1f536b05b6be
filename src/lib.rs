pub mod config;
mod data;
pub mod error;
pub mod models;
pub mod scope_path;
pub mod services;
pub mod state;

pub use config::EngineConfig;
pub use error::AppError;
pub use models::event::{BackendEvent, QueuedEvent};
pub use models::file_entry::{FileEntry, ThumbnailState};
pub use models::summary::{Summary, SummaryUpdate};
pub use services::collection::Collection;
pub use services::event_service::{Broadcaster, EventDispatcher, EventQueue, EventSubscription};
pub use services::library::Library;
pub use services::thumbnail_service::{FfmpegTranscoder, Transcoder};
pub use state::AppState;

/// Installs the global fmt subscriber. `RUST_LOG` wins over `debug`.
/// Does nothing if a subscriber is already installed.
pub fn init_tracing(debug: bool) {
    let default_filter = if debug { "trove=debug" } else { "trove=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
