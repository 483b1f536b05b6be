use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::data::repository;
use crate::error::AppError;
use crate::models::file_entry::FileEntry;
use crate::models::thumbnail::{thumbnail_file_name, ThumbnailRecord};

/// Fraction of the media duration at which the thumbnail frame is taken.
const FRAME_POSITION: f64 = 0.04;

const VIDEO_EXTENSIONS: &[&str] = &[
    "3g2", "3gp", "3gpp", "asf", "asx", "avi", "dvb", "f4v", "fli", "flv", "fvt", "h261", "h263",
    "h264", "jpgm", "jpgv", "jpm", "m1v", "m2v", "m4u", "m4v", "mj2", "mjp2", "mk3d", "mks", "mkv",
    "mng", "mov", "movie", "mp4", "mp4v", "mpe", "mpeg", "mpg", "mpg4", "mxu", "ogv", "pyv", "qt",
    "smv", "ts", "uvh", "uvm", "uvp", "uvs", "uvu", "uvv", "uvvh", "uvvm", "uvvp", "uvvs", "uvvu",
    "uvvv", "viv", "vob", "webm", "wm", "wmv", "wmx", "wvx",
];

const IMAGE_EXTENSIONS: &[&str] = &[
    "apng", "bmp", "gif", "heic", "heif", "jpe", "jpeg", "jpg", "png", "tga", "tif", "tiff", "webp",
];

pub fn supports_thumbnail(extension: &str) -> bool {
    let ext = extension.to_ascii_lowercase();
    VIDEO_EXTENSIONS.contains(&ext.as_str()) || IMAGE_EXTENSIONS.contains(&ext.as_str())
}

/// External media tool used to render thumbnails.
pub trait Transcoder: Send + Sync {
    /// Media duration in seconds, or `None` when it cannot be determined.
    fn probe_duration(&self, source: &Path) -> Option<f64>;

    /// Writes a single downsized frame of `source` to `dest`. `offset` is the
    /// position in seconds; `None` takes the first frame.
    fn extract_frame(&self, source: &Path, dest: &Path, offset: Option<f64>)
        -> Result<(), AppError>;
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    width: u32,
    quality: u8,
}

impl FfmpegTranscoder {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
            width: config.thumbnail_width,
            quality: config.thumbnail_quality,
        }
    }
}

impl Transcoder for FfmpegTranscoder {
    fn probe_duration(&self, source: &Path) -> Option<f64> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(source)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;

        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout).trim().parse().ok()
    }

    fn extract_frame(
        &self,
        source: &Path,
        dest: &Path,
        offset: Option<f64>,
    ) -> Result<(), AppError> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-y");
        if let Some(offset) = offset {
            cmd.args(["-ss", &seconds_to_ffmpeg_duration(offset)]);
        }
        cmd.arg("-i")
            .arg(source)
            .args([
                "-an",
                "-vframes",
                "1",
                "-q:v",
                &self.quality.to_string(),
                "-filter:v",
                &format!("scale={}:-1", self.width),
            ])
            .arg(dest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let status = cmd.status().map_err(|e| {
            AppError::ThumbnailGenerationFailed(format!(
                "could not run {}: {e}",
                self.ffmpeg.display()
            ))
        })?;
        if !status.success() {
            return Err(AppError::ThumbnailGenerationFailed(format!(
                "ffmpeg exited with {status}"
            )));
        }
        Ok(())
    }
}

/// `HH:MM:SS.mmm`, as accepted by ffmpeg's `-ss`.
pub fn seconds_to_ffmpeg_duration(seconds: f64) -> String {
    let total_millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let millis = total_millis % 1000;
    let total_secs = total_millis / 1000;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        total_secs / 3600,
        (total_secs / 60) % 60,
        total_secs % 60,
        millis
    )
}

fn remove_best_effort(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "could not remove thumbnail file");
        }
    }
}

/// Generated thumbnails of one collection, invalidated by modification time.
///
/// A record is valid only while its image exists on disk and its generation
/// epoch is not older than the source file's modification time. Anything
/// else is evicted on the next check.
pub struct ThumbnailCache {
    thumbs_dir: PathBuf,
    db: Arc<Mutex<Connection>>,
    transcoder: Arc<dyn Transcoder>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Image names written or being written but not yet recorded.
    rendering: Mutex<HashSet<String>>,
}

/// Keeps a thumbnail name in `ThumbnailCache::rendering` until dropped.
struct RenderingName<'a> {
    set: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> RenderingName<'a> {
    fn claim(set: &'a Mutex<HashSet<String>>, name: &str) -> Self {
        set.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string());
        Self {
            set,
            name: name.to_string(),
        }
    }
}

impl Drop for RenderingName<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.name);
    }
}

impl ThumbnailCache {
    pub fn new(
        thumbs_dir: PathBuf,
        db: Arc<Mutex<Connection>>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Result<Self, AppError> {
        fs::create_dir_all(&thumbs_dir)?;
        Ok(Self {
            thumbs_dir,
            db,
            transcoder,
            in_flight: Mutex::new(HashMap::new()),
            rendering: Mutex::new(HashSet::new()),
        })
    }

    pub fn thumbs_dir(&self) -> &Path {
        &self.thumbs_dir
    }

    /// Name of the cached thumbnail for `entry`, evicting it first if it
    /// went stale or its image disappeared.
    pub fn check_thumbnail(&self, entry: &FileEntry) -> Result<Option<String>, AppError> {
        let conn = self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(record) = repository::get_thumbnail(&conn, &entry.hash)? else {
            return Ok(None);
        };

        let name = record.file_name();
        let path = self.thumbs_dir.join(&name);
        if record.epoch < entry.mod_time {
            debug!(path = %entry.nix_path, "thumbnail is older than its source, evicting");
            remove_best_effort(&path);
            repository::delete_thumbnail(&conn, &record.id)?;
            return Ok(None);
        }
        if !path.exists() {
            debug!(path = %entry.nix_path, "thumbnail image is missing, evicting");
            repository::delete_thumbnail(&conn, &record.id)?;
            return Ok(None);
        }

        Ok(Some(name))
    }

    /// Renders a thumbnail for `entry` and records it. Unless
    /// `skip_existing_check` is set, a valid cached thumbnail is returned
    /// instead. Generation for one identity is serialized.
    pub fn generate_thumbnail(
        &self,
        entry: &FileEntry,
        skip_existing_check: bool,
    ) -> Result<String, AppError> {
        let lock = self.identity_lock(&entry.hash);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.generate_locked(entry, skip_existing_check)
        };
        self.release_identity_lock(&entry.hash, lock);
        result
    }

    fn generate_locked(
        &self,
        entry: &FileEntry,
        skip_existing_check: bool,
    ) -> Result<String, AppError> {
        if !skip_existing_check {
            if let Some(name) = self.check_thumbnail(entry)? {
                return Ok(name);
            }
        }

        let previous = {
            let conn = self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            repository::get_thumbnail(&conn, &entry.hash)?
        };

        let thumb_id = uuid::Uuid::new_v4().simple().to_string();
        let name = thumbnail_file_name(&thumb_id);
        let dest = self.thumbs_dir.join(&name);
        let _rendering = RenderingName::claim(&self.rendering, &name);

        let offset = self
            .transcoder
            .probe_duration(&entry.os_path)
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| d * FRAME_POSITION);
        if offset.is_none() {
            debug!(path = %entry.nix_path, "duration unknown, using first frame");
        }

        if let Err(e) = self.transcoder.extract_frame(&entry.os_path, &dest, offset) {
            remove_best_effort(&dest);
            return Err(e);
        }
        if !dest.is_file() {
            return Err(AppError::ThumbnailGenerationFailed(format!(
                "transcoder produced no image for {}",
                entry.nix_path
            )));
        }

        let record = ThumbnailRecord {
            id: thumb_id,
            hash: entry.hash.clone(),
            nix_path: entry.nix_path.clone(),
            is_directory: entry.is_dir,
            epoch: chrono::Utc::now().timestamp(),
        };
        {
            let conn = self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            repository::upsert_thumbnail(&conn, &record)?;
        }
        if let Some(previous) = previous {
            remove_best_effort(&self.thumbs_dir.join(previous.file_name()));
        }

        debug!(path = %entry.nix_path, thumbnail = %name, "thumbnail generated");
        Ok(name)
    }

    fn identity_lock(&self, hash: &str) -> Arc<Mutex<()>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight
            .entry(hash.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_identity_lock(&self, hash: &str, lock: Arc<Mutex<()>>) {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // The map and `lock` are the only holders left.
        if Arc::strong_count(&lock) <= 2 {
            in_flight.remove(hash);
        }
    }

    /// Deletes thumbnail images that no record points at. Images still being
    /// rendered are left alone: the store stays locked for the whole sweep,
    /// so a render either has recorded its image already or is still listed
    /// in `rendering`.
    pub fn sweep_orphans(&self) -> Result<usize, AppError> {
        let conn = self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let known: HashSet<String> = repository::list_thumbnail_ids(&conn)?
            .iter()
            .map(|id| thumbnail_file_name(id))
            .collect();

        let mut removed = 0;
        for entry in fs::read_dir(&self.thumbs_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".jpg") || known.contains(&name) {
                continue;
            }
            let rendering = self
                .rendering
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .contains(&name);
            if rendering {
                debug!(thumbnail = %name, "skipping thumbnail that is still rendering");
                continue;
            }
            remove_best_effort(&entry.path());
            removed += 1;
        }
        Ok(removed)
    }
}
