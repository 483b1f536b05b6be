use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info};

use crate::data::{self, repository};
use crate::error::AppError;
use crate::models::event::BackendEvent;
use crate::models::file_entry::{FileEntry, ThumbnailState};
use crate::models::summary::{Summary, SummaryUpdate};
use crate::models::thumbnail::{ThumbnailBatchReport, ThumbnailFailure, ThumbnailUpdate};
use crate::scope_path;
use crate::services::event_service::Broadcaster;
use crate::services::file_service::{FileManager, CONFIG_DIR_NAME};
use crate::services::thumbnail_service::{ThumbnailCache, Transcoder};

pub const DB_FILE_NAME: &str = "data.sqlite3";
const THUMBS_DIR_NAME: &str = "thumbs";

const ID_FIELD: &str = "id";
const SLUG_FIELD: &str = "slug";
const NAME_FIELD: &str = "name";
const ICON_FIELD: &str = "icon";
const COLOR_FIELD: &str = "color";
const SUMMARY_FIELDS: [&str; 5] = [ID_FIELD, SLUG_FIELD, NAME_FIELD, ICON_FIELD, COLOR_FIELD];

/// Collaborators shared by every collection of a library.
#[derive(Clone)]
pub struct CollectionContext {
    pub transcoder: Arc<dyn Transcoder>,
    pub broadcaster: Arc<dyn Broadcaster>,
}

#[derive(Debug, Serialize)]
pub struct DirectoryContents {
    pub directory: FileEntry,
    pub files: Vec<FileEntry>,
}

/// One indexed root directory and its metadata store.
pub struct Collection {
    id: String,
    root: PathBuf,
    config_dir: PathBuf,
    db: Arc<Mutex<Connection>>,
    summary: RwLock<Summary>,
    files: FileManager,
    broadcaster: Arc<dyn Broadcaster>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("id", &self.id)
            .field("root", &self.root)
            .finish()
    }
}

impl Collection {
    /// Opens the collection rooted at `root`. Without `allow_create`, a root
    /// that has never been opened before is refused. `default_summary` is
    /// only consulted when the store lacks some summary property.
    pub fn open(
        root: &Path,
        allow_create: bool,
        default_summary: &dyn Fn(&Path) -> Summary,
        ctx: CollectionContext,
    ) -> Result<Self, AppError> {
        if !root.is_dir() {
            return Err(AppError::NotFound(format!(
                "collection path does not exist: {}",
                root.display()
            )));
        }

        let config_dir = root.join(CONFIG_DIR_NAME);
        if !config_dir.exists() && !allow_create {
            return Err(AppError::CreationNotAllowed(config_dir));
        }
        fs::create_dir_all(&config_dir)?;

        let db_file = config_dir.join(DB_FILE_NAME);
        if !db_file.exists() && !allow_create {
            return Err(AppError::CreationNotAllowed(db_file));
        }

        let conn = data::open_collection_db(&db_file)?;
        let summary = load_summary(&conn, root, default_summary)?;
        debug!(summary = ?summary, "effective collection summary");

        let db = Arc::new(Mutex::new(conn));
        let thumbnails = ThumbnailCache::new(
            config_dir.join(THUMBS_DIR_NAME),
            db.clone(),
            ctx.transcoder,
        )?;

        Ok(Self {
            id: summary.id.clone(),
            root: root.to_path_buf(),
            config_dir,
            db,
            summary: RwLock::new(summary),
            files: FileManager::new(root.to_path_buf(), thumbnails),
            broadcaster: ctx.broadcaster,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn thumbs_dir(&self) -> &Path {
        self.files.thumbnails().thumbs_dir()
    }

    pub fn summary(&self) -> Summary {
        self.summary
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Stamps this collection's id onto `payload` and hands it to the
    /// broadcaster.
    pub fn dispatch_event(
        &self,
        event: BackendEvent,
        payload: serde_json::Value,
    ) -> Result<(), AppError> {
        let serde_json::Value::Object(mut fields) = payload else {
            return Err(AppError::InvalidPayload(format!(
                "payload for event {event} is not an object"
            )));
        };
        if fields.contains_key(ID_FIELD) {
            return Err(AppError::InvalidPayload(format!(
                "payload for event {event} already contains an id field"
            )));
        }

        fields.insert(ID_FIELD.to_string(), json!(self.id));
        self.broadcaster
            .enqueue(event, serde_json::Value::Object(fields));
        Ok(())
    }

    fn resolve_all(&self, mut entries: Vec<FileEntry>) -> Result<Vec<FileEntry>, AppError> {
        let conn = self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for entry in entries.iter_mut() {
            entry.entity_id = repository::get_entity_id(&conn, &entry.hash)?;
        }
        Ok(entries)
    }

    fn resolve(&self, entry: FileEntry) -> Result<FileEntry, AppError> {
        let mut resolved = self.resolve_all(vec![entry])?;
        resolved
            .pop()
            .ok_or_else(|| AppError::General("entry lost during resolution".to_string()))
    }

    pub fn get_directory_contents(&self, path: &str) -> Result<DirectoryContents, AppError> {
        let nix_path = scope_path::to_collection_path(path)?;
        let directory = self.resolve(self.files.get_file_details(&nix_path)?)?;
        let files = self.resolve_all(self.files.get_directory_details(&nix_path)?)?;
        Ok(DirectoryContents { directory, files })
    }

    /// Reconciles a client's cached listing of `path` with disk, broadcasting
    /// removals and updates. Returns the directory's own fresh entry.
    pub fn scan_directory_for_changes(
        &self,
        path: &str,
        cached_identities: &[String],
        last_read_time: i64,
    ) -> Result<FileEntry, AppError> {
        let nix_path = scope_path::to_collection_path(path)?;
        let diff = self
            .files
            .get_directory_diff(&nix_path, cached_identities, last_read_time)?;

        if !diff.removed.is_empty() {
            debug!(collection = %self.id, path = %nix_path, count = diff.removed.len(), "files removed");
            self.dispatch_event(BackendEvent::FilesRemoved, json!({ "hashes": diff.removed }))?;
        }
        if !diff.changed.is_empty() {
            debug!(collection = %self.id, path = %nix_path, count = diff.changed.len(), "files updated");
            let files = self.resolve_all(diff.changed)?;
            self.dispatch_event(BackendEvent::FilesUpdated, json!({ "files": files }))?;
        }

        self.resolve(self.files.get_file_details(&nix_path)?)
    }

    /// Applies every non-empty field of `update`, then broadcasts the full
    /// summary.
    pub fn set_properties(&self, update: &SummaryUpdate) -> Result<Summary, AppError> {
        let summary = {
            let mut summary = self
                .summary
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let conn = self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            for (field, value) in update.fields() {
                let Some(value) = value else { continue };
                repository::set_property(&conn, field, value)?;
                match field {
                    NAME_FIELD => summary.name = value.to_string(),
                    ICON_FIELD => summary.icon = value.to_string(),
                    COLOR_FIELD => summary.color = value.to_string(),
                    _ => {}
                }
            }
            summary.clone()
        };

        info!(collection = %self.id, "summary updated");
        self.dispatch_event(BackendEvent::SummaryUpdated, json!({ "summary": summary }))?;
        Ok(summary)
    }

    /// Generates thumbnails for `paths` one by one. A failing path is logged
    /// and recorded in the report; the rest of the batch continues.
    pub fn request_thumbnails(&self, paths: &[String]) -> ThumbnailBatchReport {
        let mut report = ThumbnailBatchReport::default();
        for path in paths {
            match self.generate_one(path) {
                Ok(update) => {
                    let event = json!({
                        "thumbs": [update],
                        "thumbState": ThumbnailState::Ready,
                    });
                    if let Err(e) = self.dispatch_event(BackendEvent::ThumbnailsUpdated, event) {
                        error!(collection = %self.id, error = %e, "could not dispatch thumbnail event");
                    }
                    report.generated.push(update);
                }
                Err(e) => {
                    error!(collection = %self.id, path = %path, error = %e, "could not generate thumbnail");
                    report.failed.push(ThumbnailFailure {
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        report
    }

    fn generate_one(&self, path: &str) -> Result<ThumbnailUpdate, AppError> {
        let entry = self.files.get_file_details(path)?;
        if entry.thumb_state == ThumbnailState::Impossible {
            return Err(AppError::ThumbnailGenerationFailed(format!(
                "thumbnails are not supported for {}",
                entry.nix_path
            )));
        }
        let thumb_name = self.files.thumbnails().generate_thumbnail(&entry, false)?;
        Ok(ThumbnailUpdate {
            hash: entry.hash,
            thumb_name,
        })
    }

    /// Runs `request_thumbnails` on the blocking pool. Must be called from
    /// within a Tokio runtime.
    pub fn spawn_thumbnail_batch(
        self: &Arc<Self>,
        paths: Vec<String>,
    ) -> tokio::task::JoinHandle<ThumbnailBatchReport> {
        let collection = Arc::clone(self);
        tokio::task::spawn_blocking(move || collection.request_thumbnails(&paths))
    }

    /// Persists the entity link of `path` if it has none yet.
    pub fn reference_entity(&self, path: &str) -> Result<FileEntry, AppError> {
        let mut entry = self.files.get_file_details(path)?;
        let conn = self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let entity_id =
            repository::ensure_entity(&conn, &entry.hash, &entry.nix_path, entry.is_dir)?;
        entry.entity_id = Some(entity_id);
        Ok(entry)
    }

    pub fn sweep_orphan_thumbnails(&self) -> Result<usize, AppError> {
        let removed = self.files.thumbnails().sweep_orphans()?;
        if removed > 0 {
            info!(collection = %self.id, removed, "removed orphaned thumbnails");
        }
        Ok(removed)
    }
}

fn load_summary(
    conn: &Connection,
    root: &Path,
    default_summary: &dyn Fn(&Path) -> Summary,
) -> Result<Summary, AppError> {
    let stored = repository::load_properties(conn)?;
    let complete = SUMMARY_FIELDS.iter().all(|field| stored.contains_key(*field));
    let defaults = if complete {
        None
    } else {
        Some(default_summary(root))
    };

    let property = |field: &str, fallback: Option<&str>| -> Result<String, AppError> {
        match (stored.get(field), fallback) {
            (Some(value), _) => Ok(value.clone()),
            (None, Some(fallback)) => repository::get_or_insert_property(conn, field, fallback),
            (None, None) => Err(AppError::General(format!(
                "collection property {field} is missing"
            ))),
        }
    };
    let defaults = defaults.as_ref();

    Ok(Summary {
        id: property(ID_FIELD, defaults.map(|d| d.id.as_str()))?,
        slug: property(SLUG_FIELD, defaults.map(|d| d.slug.as_str()))?,
        name: property(NAME_FIELD, defaults.map(|d| d.name.as_str()))?,
        icon: property(ICON_FIELD, defaults.map(|d| d.icon.as_str()))?,
        color: property(COLOR_FIELD, defaults.map(|d| d.color.as_str()))?,
        path: root.to_path_buf(),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::models::summary::DEFAULT_ICON;
    use crate::services::event_service::testing::RecordingBroadcaster;
    use crate::services::thumbnail_service::testing::FakeTranscoder;

    pub fn fixed_summary(id: &str, slug: &str) -> impl Fn(&Path) -> Summary {
        let (id, slug) = (id.to_string(), slug.to_string());
        move |path: &Path| Summary {
            id: id.clone(),
            slug: slug.clone(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            icon: DEFAULT_ICON.to_string(),
            color: "#1976d2".to_string(),
            path: path.to_path_buf(),
        }
    }

    pub fn context() -> (CollectionContext, Arc<RecordingBroadcaster>) {
        let events = Arc::new(RecordingBroadcaster::default());
        let ctx = CollectionContext {
            transcoder: Arc::new(FakeTranscoder::default()),
            broadcaster: events.clone(),
        };
        (ctx, events)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{context, fixed_summary};
    use super::*;
    use crate::services::identity::compute_identity;
    use std::cell::Cell;

    fn media_root() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("media");
        fs::create_dir_all(root.join("shows")).unwrap();
        fs::write(root.join("pilot.mkv"), b"video").unwrap();
        fs::write(root.join("poster.jpg"), b"image").unwrap();
        fs::write(root.join("broken.mp4"), b"bad").unwrap();
        fs::write(root.join("notes.txt"), b"text").unwrap();
        (dir, root)
    }

    fn open(root: &Path) -> (Collection, Arc<crate::services::event_service::testing::RecordingBroadcaster>) {
        let (ctx, events) = context();
        let collection =
            Collection::open(root, true, &fixed_summary("a1b2c3", "media"), ctx).unwrap();
        (collection, events)
    }

    #[test]
    fn test_open_creates_private_store() {
        let (_dir, root) = media_root();
        let (collection, _) = open(&root);

        assert!(root.join(CONFIG_DIR_NAME).join(DB_FILE_NAME).is_file());
        assert!(collection.thumbs_dir().is_dir());
        let summary = collection.summary();
        assert_eq!(summary.id, "a1b2c3");
        assert_eq!(summary.slug, "media");
        assert_eq!(summary.name, "media");
        assert_eq!(summary.path, root);
    }

    #[test]
    fn test_open_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context();
        let err = Collection::open(
            &dir.path().join("nope"),
            true,
            &fixed_summary("a1b2c3", "nope"),
            ctx,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_open_without_create_permission() {
        let (_dir, root) = media_root();
        let (ctx, _) = context();
        let err = Collection::open(&root, false, &fixed_summary("a1b2c3", "media"), ctx)
            .unwrap_err();
        assert!(matches!(err, AppError::CreationNotAllowed(_)));
        assert!(!root.join(CONFIG_DIR_NAME).exists());
    }

    #[test]
    fn test_reopen_keeps_stored_summary() {
        let (_dir, root) = media_root();
        {
            let (collection, _) = open(&root);
            collection
                .set_properties(&SummaryUpdate {
                    name: Some("Movies".into()),
                    ..SummaryUpdate::default()
                })
                .unwrap();
        }

        let calls = Cell::new(0);
        let generator = |path: &Path| {
            calls.set(calls.get() + 1);
            fixed_summary("zzzzzz", "other")(path)
        };
        let (ctx, _) = context();
        let reopened = Collection::open(&root, false, &generator, ctx).unwrap();

        assert_eq!(calls.get(), 0);
        assert_eq!(reopened.id(), "a1b2c3");
        assert_eq!(reopened.summary().name, "Movies");
    }

    #[test]
    fn test_open_rejects_unknown_schema_version() {
        let (_dir, root) = media_root();
        drop(open(&root));

        let conn = Connection::open(root.join(CONFIG_DIR_NAME).join(DB_FILE_NAME)).unwrap();
        conn.execute("UPDATE version SET version = 99", []).unwrap();
        drop(conn);

        let (ctx, _) = context();
        let err = Collection::open(&root, false, &fixed_summary("a1b2c3", "media"), ctx)
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::UnsupportedSchemaVersion { found: 99, .. }
        ));
    }

    #[test]
    fn test_directory_contents() {
        let (_dir, root) = media_root();
        let (collection, _) = open(&root);

        let contents = collection.get_directory_contents("/").unwrap();
        assert_eq!(contents.directory.nix_path, "/");
        assert!(contents.directory.is_dir);
        let names: Vec<&str> = contents.files.iter().map(|f| f.base.as_str()).collect();
        assert_eq!(
            names,
            vec!["shows", "broken.mp4", "notes.txt", "pilot.mkv", "poster.jpg"]
        );
        assert!(contents.files.iter().all(|f| f.entity_id.is_none()));
    }

    #[test]
    fn test_reference_entity_is_resolved_in_listings() {
        let (_dir, root) = media_root();
        let (collection, _) = open(&root);

        let referenced = collection.reference_entity("/pilot.mkv").unwrap();
        let entity_id = referenced.entity_id.clone().unwrap();
        assert_eq!(
            collection.reference_entity("pilot.mkv").unwrap().entity_id,
            Some(entity_id.clone())
        );

        let contents = collection.get_directory_contents("/").unwrap();
        let pilot = contents
            .files
            .iter()
            .find(|f| f.base == "pilot.mkv")
            .unwrap();
        assert_eq!(pilot.entity_id, Some(entity_id));
    }

    #[test]
    fn test_scan_reports_deleted_child() {
        let (_dir, root) = media_root();
        let (collection, events) = open(&root);

        let contents = collection.get_directory_contents("/").unwrap();
        let known: Vec<String> = contents.files.iter().map(|f| f.hash.clone()).collect();
        let scanned_at = contents.directory.read_time;

        fs::remove_file(root.join("notes.txt")).unwrap();
        let dir_entry = collection
            .scan_directory_for_changes("/", &known, scanned_at)
            .unwrap();

        assert_eq!(dir_entry.nix_path, "/");
        assert!(dir_entry.read_time >= scanned_at);

        let removed = events.of(BackendEvent::FilesRemoved);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0]["id"], "a1b2c3");
        assert_eq!(
            removed[0]["hashes"],
            json!([compute_identity("/notes.txt")])
        );
        assert!(events.of(BackendEvent::FilesUpdated).is_empty());
    }

    #[test]
    fn test_scan_without_cache_updates_everything() {
        let (_dir, root) = media_root();
        let (collection, events) = open(&root);

        collection.scan_directory_for_changes("/", &[], 0).unwrap();

        assert!(events.of(BackendEvent::FilesRemoved).is_empty());
        let updated = events.of(BackendEvent::FilesUpdated);
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["files"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_scan_without_changes_is_quiet() {
        let (_dir, root) = media_root();
        let (collection, events) = open(&root);
        let contents = collection.get_directory_contents("/").unwrap();
        let known: Vec<String> = contents.files.iter().map(|f| f.hash.clone()).collect();

        collection
            .scan_directory_for_changes("/", &known, contents.directory.read_time)
            .unwrap();
        assert!(events.take().is_empty());
    }

    #[test]
    fn test_set_properties_updates_and_broadcasts() {
        let (_dir, root) = media_root();
        let (collection, events) = open(&root);

        let summary = collection
            .set_properties(&SummaryUpdate {
                name: Some("Films".into()),
                icon: Some(String::new()),
                color: Some("#00796b".into()),
            })
            .unwrap();

        assert_eq!(summary.name, "Films");
        assert_eq!(summary.icon, crate::models::summary::DEFAULT_ICON);
        assert_eq!(summary.color, "#00796b");
        assert_eq!(collection.summary(), summary);

        let updates = events.of(BackendEvent::SummaryUpdated);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0]["summary"]["name"], "Films");
    }

    #[test]
    fn test_empty_update_still_broadcasts() {
        let (_dir, root) = media_root();
        let (collection, events) = open(&root);
        collection.set_properties(&SummaryUpdate::default()).unwrap();
        assert_eq!(events.of(BackendEvent::SummaryUpdated).len(), 1);
    }

    #[test]
    fn test_dispatch_event_validates_payload() {
        let (_dir, root) = media_root();
        let (collection, events) = open(&root);

        let err = collection
            .dispatch_event(BackendEvent::FilesUpdated, json!(["not", "an", "object"]))
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidPayload(_)));

        let err = collection
            .dispatch_event(BackendEvent::FilesUpdated, json!({"id": "spoofed"}))
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidPayload(_)));
        assert!(events.take().is_empty());

        collection
            .dispatch_event(BackendEvent::FilesUpdated, json!({"files": []}))
            .unwrap();
        let sent = events.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1["id"], "a1b2c3");
    }

    #[test]
    fn test_thumbnail_batch_isolates_failures() {
        let (_dir, root) = media_root();
        let (collection, events) = open(&root);

        let report = collection.request_thumbnails(&[
            "/pilot.mkv".to_string(),
            "/broken.mp4".to_string(),
            "/missing.mp4".to_string(),
            "/notes.txt".to_string(),
            "/poster.jpg".to_string(),
        ]);

        let generated: Vec<&str> = report.generated.iter().map(|u| u.hash.as_str()).collect();
        assert_eq!(
            generated,
            vec![
                compute_identity("/pilot.mkv").as_str(),
                compute_identity("/poster.jpg").as_str()
            ]
        );
        let failed: Vec<&str> = report.failed.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(failed, vec!["/broken.mp4", "/missing.mp4", "/notes.txt"]);

        let thumbs = events.of(BackendEvent::ThumbnailsUpdated);
        assert_eq!(thumbs.len(), 2);
        assert_eq!(thumbs[0]["thumbState"], "ready");
        assert_eq!(thumbs[0]["thumbs"][0]["thumbName"], json!(report.generated[0].thumb_name));

        let listing = collection.get_directory_contents("/").unwrap();
        let pilot = listing.files.iter().find(|f| f.base == "pilot.mkv").unwrap();
        assert_eq!(pilot.thumb_state, ThumbnailState::Ready);
    }

    #[tokio::test]
    async fn test_spawned_thumbnail_batch() {
        let (_dir, root) = media_root();
        let (collection, events) = open(&root);
        let collection = Arc::new(collection);

        let report = collection
            .spawn_thumbnail_batch(vec!["/pilot.mkv".to_string(), "/broken.mp4".to_string()])
            .await
            .unwrap();

        assert_eq!(report.generated.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(events.of(BackendEvent::ThumbnailsUpdated).len(), 1);
    }

    #[test]
    fn test_sweep_orphan_thumbnails() {
        let (_dir, root) = media_root();
        let (collection, _) = open(&root);
        collection.request_thumbnails(&["/pilot.mkv".to_string()]);
        fs::write(collection.thumbs_dir().join("leftover.jpg"), b"x").unwrap();

        assert_eq!(collection.sweep_orphan_thumbnails().unwrap(), 1);
        assert_eq!(collection.sweep_orphan_thumbnails().unwrap(), 0);
    }
}
