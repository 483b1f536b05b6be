use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::models::event::BackendEvent;
use crate::models::summary::{Summary, DEFAULT_ICON};
use crate::services::collection::{Collection, CollectionContext};
use crate::services::identity::random_hash;
use crate::services::settings_service::SettingsStore;

const COLLECTION_ID_LEN: usize = 6;
const COLOR_STEP: usize = 6;
const FALLBACK_SLUG: &str = "collection";

pub const COLLECTION_COLORS: [&str; 40] = [
    "#b71c1c", "#d32f2f", "#f44336", "#880e4f", "#c2185b", "#e91e63", "#4a148c", "#7b1fa2",
    "#9c27b0", "#311b92", "#512da8", "#673ab7", "#1a237e", "#303f9f", "#3f51b5", "#0d47a1",
    "#1976d2", "#2196f3", "#006064", "#0097a7", "#004d40", "#00796b", "#009688", "#194d33",
    "#388e3c", "#4caf50", "#e65100", "#f57c00", "#bf360c", "#e64a19", "#ff5722", "#3e2723",
    "#5d4037", "#795548", "#263238", "#455a64", "#607d8b", "#000000", "#525252", "#969696",
];

/// The three lookup tables over open collections. They are only ever
/// mutated together, under `Library::indices`.
#[derive(Default)]
struct Indices {
    by_id: HashMap<String, Arc<Collection>>,
    by_slug: HashMap<String, Arc<Collection>>,
    by_path: HashMap<PathBuf, Arc<Collection>>,
    /// Ids in the order their collections were opened.
    order: Vec<String>,
    /// Defaults handed out to collections still being constructed.
    pending_ids: HashSet<String>,
    pending_slugs: HashSet<String>,
}

impl Indices {
    fn id_taken(&self, id: &str) -> bool {
        self.by_id.contains_key(id) || self.pending_ids.contains(id)
    }

    fn slug_taken(&self, slug: &str) -> bool {
        self.by_slug.contains_key(slug) || self.pending_slugs.contains(slug)
    }

    fn insert(&mut self, collection: Arc<Collection>) {
        let summary = collection.summary();
        self.by_id.insert(summary.id.clone(), collection.clone());
        self.by_slug.insert(summary.slug, collection.clone());
        self.by_path.insert(summary.path, collection);
        self.order.push(summary.id);
    }

    fn remove(&mut self, id: &str) -> Option<Arc<Collection>> {
        let collection = self.by_id.remove(id)?;
        let summary = collection.summary();
        self.by_slug.remove(&summary.slug);
        self.by_path.remove(&summary.path);
        self.order.retain(|open_id| open_id != id);
        Some(collection)
    }

    fn ordered(&self) -> impl Iterator<Item = &Arc<Collection>> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }
}

/// Registry of every open collection in the process.
pub struct Library {
    indices: Mutex<Indices>,
    /// Serializes settings writes; held without the registry lock.
    persist: Mutex<()>,
    settings: Arc<SettingsStore>,
    ctx: CollectionContext,
    color_cursor: AtomicUsize,
}

impl Library {
    pub fn new(settings: Arc<SettingsStore>, ctx: CollectionContext) -> Self {
        Self {
            indices: Mutex::new(Indices::default()),
            persist: Mutex::new(()),
            settings,
            ctx,
            color_cursor: AtomicUsize::new(0),
        }
    }

    /// Builds the library and reopens every collection listed in the
    /// settings. Paths that fail to open are logged and dropped from the
    /// list.
    pub fn start(settings: Arc<SettingsStore>, ctx: CollectionContext) -> Result<Self, AppError> {
        let library = Self::new(settings, ctx);
        let paths = library.settings.open_collections();
        debug!(count = paths.len(), "restoring open collections");

        for path in &paths {
            if let Err(e) = library.open(path, false) {
                error!(path = %path.display(), error = %e, "could not restore collection");
            }
        }

        library.persist_open_collections()?;
        Ok(library)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Indices> {
        self.indices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the collection rooted at `path`, opening it if needed.
    /// Construction happens outside the registry lock; the result is only
    /// committed if its id and slug are still free.
    pub fn open(&self, path: &Path, allow_create: bool) -> Result<Arc<Collection>, AppError> {
        let path = fs::canonicalize(path).map_err(|e| {
            AppError::NotFound(format!("collection path {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), "opening collection");

        if let Some(existing) = self.lock().by_path.get(&path) {
            debug!(path = %path.display(), "collection already open");
            return Ok(existing.clone());
        }

        let reserved = RefCell::new(Vec::new());
        let generate = |root: &Path| {
            let summary = self.reserve_default_summary(root);
            reserved
                .borrow_mut()
                .push((summary.id.clone(), summary.slug.clone()));
            summary
        };
        let built = Collection::open(&path, allow_create, &generate, self.ctx.clone());

        let mut indices = self.lock();
        for (id, slug) in reserved.into_inner() {
            indices.pending_ids.remove(&id);
            indices.pending_slugs.remove(&slug);
        }
        let collection = Arc::new(built?);

        if let Some(existing) = indices.by_path.get(&path) {
            debug!(path = %path.display(), "collection was opened concurrently");
            return Ok(existing.clone());
        }

        let summary = collection.summary();
        let mut conflicts = Vec::new();
        if indices.by_id.contains_key(&summary.id) {
            conflicts.push("ID");
        }
        if indices.by_slug.contains_key(&summary.slug) {
            conflicts.push("slug");
        }
        if !conflicts.is_empty() {
            warn!(path = %path.display(), fields = ?conflicts, "collection conflicts with an open collection");
            return Err(AppError::ConflictingCollection { fields: conflicts });
        }

        indices.insert(collection.clone());
        info!(collection = %summary.id, slug = %summary.slug, "collection opened");
        Ok(collection)
    }

    /// Opens (creating if needed) a collection on behalf of a client, then
    /// records it in the settings and announces it.
    pub fn open_collection(&self, path: &Path) -> Result<Arc<Collection>, AppError> {
        let collection = self.open(path, true)?;
        if let Err(e) = self.persist_open_collections() {
            error!(error = %e, "could not save open collections");
        }
        collection.dispatch_event(
            BackendEvent::CollectionOpened,
            json!({ "summary": collection.summary() }),
        )?;
        Ok(collection)
    }

    pub fn close_collection(&self, id: &str) -> Result<(), AppError> {
        let collection = self
            .lock()
            .remove(id)
            .ok_or_else(|| AppError::NotFound(format!("no open collection with ID {id}")))?;
        info!(collection = %id, "collection closed");

        if let Err(e) = self.persist_open_collections() {
            error!(error = %e, "could not save open collections");
        }
        collection.dispatch_event(BackendEvent::CollectionClosed, json!({}))
    }

    pub fn get_collection(&self, id: &str) -> Result<Arc<Collection>, AppError> {
        if id.is_empty() {
            return Err(AppError::NotFound("collection ID is empty".to_string()));
        }
        self.lock()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("no open collection with ID {id}")))
    }

    /// Summaries of the open collections, in the order they were opened.
    pub fn get_summaries(&self) -> Vec<Summary> {
        self.lock().ordered().map(|c| c.summary()).collect()
    }

    /// A summary whose id and slug are unused by every open collection.
    pub fn generate_default_summary(&self, path: &Path) -> Summary {
        let indices = self.lock();
        self.default_summary_locked(&indices, path)
    }

    fn reserve_default_summary(&self, path: &Path) -> Summary {
        let mut indices = self.lock();
        let summary = self.default_summary_locked(&indices, path);
        indices.pending_ids.insert(summary.id.clone());
        indices.pending_slugs.insert(summary.slug.clone());
        summary
    }

    fn default_summary_locked(&self, indices: &Indices, path: &Path) -> Summary {
        let seed = path.to_string_lossy();
        let id = loop {
            let candidate = random_hash(&seed, COLLECTION_ID_LEN);
            if !indices.id_taken(&candidate) {
                break candidate;
            }
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let base = match slugify(&name) {
            s if s.is_empty() => FALLBACK_SLUG.to_string(),
            s => s,
        };
        let slug = std::iter::once(base.clone())
            .chain(slug_suffixes().map(|suffix| format!("{base}_{suffix}")))
            .find(|candidate| !indices.slug_taken(candidate))
            .unwrap_or_else(|| FALLBACK_SLUG.to_string());

        let cursor = self.color_cursor.fetch_add(COLOR_STEP, Ordering::Relaxed) + COLOR_STEP;
        let color = COLLECTION_COLORS[cursor % COLLECTION_COLORS.len()].to_string();

        Summary {
            id,
            slug,
            name,
            icon: DEFAULT_ICON.to_string(),
            color,
            path: path.to_path_buf(),
        }
    }

    /// Writes the current open order to the settings. The snapshot is taken
    /// after the write lock is acquired, so the last write always carries
    /// the latest registry state.
    fn persist_open_collections(&self) -> Result<(), AppError> {
        let _writing = self
            .persist
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let paths: Vec<PathBuf> = self
            .lock()
            .ordered()
            .map(|c| c.root().to_path_buf())
            .collect();
        self.settings.set_open_collections(&paths)
    }
}

/// Keeps ASCII word characters, lowercased.
pub fn slugify(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// `a` through `z`, then numbers from 27 on.
fn slug_suffixes() -> impl Iterator<Item = String> {
    ('a'..='z').map(String::from).chain((27u64..).map(|n| n.to_string()))
}
