use std::sync::Arc;

use tracing::info;

use crate::config::EngineConfig;
use crate::error::AppError;
use crate::services::collection::CollectionContext;
use crate::services::event_service::{EventDispatcher, EventQueue};
use crate::services::library::Library;
use crate::services::settings_service::SettingsStore;
use crate::services::thumbnail_service::FfmpegTranscoder;

/// Everything a transport layer needs to serve requests.
pub struct AppState {
    pub config: EngineConfig,
    pub settings: Arc<SettingsStore>,
    pub library: Arc<Library>,
    pub events: EventQueue,
}

impl AppState {
    /// Validates `config`, loads the settings and restores the previously
    /// open collections. The returned dispatcher must be run (or spawned)
    /// for events to reach subscribers.
    pub fn bootstrap(config: EngineConfig) -> Result<(Self, EventDispatcher), AppError> {
        config.validate()?;
        let settings = Arc::new(SettingsStore::load(&config.data_dir)?);
        let (events, dispatcher) = EventQueue::new();

        let ctx = CollectionContext {
            transcoder: Arc::new(FfmpegTranscoder::from_config(&config)),
            broadcaster: Arc::new(events.clone()),
        };
        let library = Arc::new(Library::start(settings.clone(), ctx)?);
        info!(
            data_dir = %config.data_dir.display(),
            collections = library.get_summaries().len(),
            "engine ready"
        );

        Ok((
            Self {
                config,
                settings,
                library,
                events,
            },
            dispatcher,
        ))
    }
}
