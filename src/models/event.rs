use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BackendEvent {
    CollectionOpened,
    CollectionClosed,
    SummaryUpdated,
    FilesUpdated,
    FilesRemoved,
    ThumbnailsUpdated,
}

impl BackendEvent {
    pub const ALL: [BackendEvent; 6] = [
        Self::CollectionOpened,
        Self::CollectionClosed,
        Self::SummaryUpdated,
        Self::FilesUpdated,
        Self::FilesRemoved,
        Self::ThumbnailsUpdated,
    ];

    /// Wire name sent to clients.
    pub const fn name(self) -> &'static str {
        match self {
            Self::CollectionOpened => "collection-open",
            Self::CollectionClosed => "collection-close",
            Self::SummaryUpdated => "collection-summary",
            Self::FilesUpdated => "collection-update-files",
            Self::FilesRemoved => "collection-remove-files",
            Self::ThumbnailsUpdated => "collection-update-thumbs",
        }
    }
}

impl std::fmt::Display for BackendEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An event as it sits in the broadcast queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedEvent {
    #[serde(serialize_with = "serialize_name")]
    pub name: BackendEvent,
    pub data: serde_json::Value,
}

fn serialize_name<S>(event: &BackendEvent, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(event.name())
}
