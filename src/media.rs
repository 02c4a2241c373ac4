//! Local references to fetched media.
//!
//! The speech endpoint returns raw audio bytes. A [`MediaStore`] turns them
//! into a playable local reference ([`MediaRef::Local`], a file on disk) and
//! deletes the file again when the reference is released. Servers that
//! return an already-renderable string (a `data:` URI or remote URL) produce
//! a [`MediaRef::Inline`], which owns no local resource.
//!
//! The store is rooted at a caller-supplied directory or at a temp directory.
//! Dropping the store releases every reference still live; a temp directory
//! is then removed as well. Copy media out with [`MediaStore::persist`] to
//! keep it.

use crate::error::StoryError;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;
use tracing::{debug, warn};

/// A reference to renderable media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaRef {
    /// A blob written by a [`MediaStore`]; must be released.
    Local {
        id: u64,
        path: PathBuf,
        mime_type: String,
    },
    /// A string the server supplied (data-URI or URL).
    Inline { uri: String },
}

impl MediaRef {
    pub fn inline(uri: impl Into<String>) -> Self {
        MediaRef::Inline { uri: uri.into() }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, MediaRef::Local { .. })
    }

    /// Something a player or `<img>`/`<audio>` element could load.
    pub fn location(&self) -> String {
        match self {
            MediaRef::Local { path, .. } => path.display().to_string(),
            MediaRef::Inline { uri } => uri.clone(),
        }
    }
}

/// Owner of all local media created during a session.
pub struct MediaStore {
    root: PathBuf,
    _temp_dir: Option<TempDir>,
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, PathBuf>>,
}

impl std::fmt::Debug for MediaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStore")
            .field("root", &self.root)
            .field("live", &self.live_count())
            .finish()
    }
}

impl MediaStore {
    /// Create a store writing into `dir`, or into a fresh temp dir if None.
    pub fn new(dir: Option<&Path>) -> Result<Self, StoryError> {
        let (root, temp_dir) = match dir {
            Some(d) => {
                std::fs::create_dir_all(d).map_err(|e| StoryError::MediaWriteFailed {
                    path: d.to_path_buf(),
                    reason: e.to_string(),
                })?;
                (d.to_path_buf(), None)
            }
            None => {
                let t = TempDir::new()
                    .map_err(|e| StoryError::Internal(format!("media temp dir: {e}")))?;
                (t.path().to_path_buf(), Some(t))
            }
        };
        Ok(Self {
            root,
            _temp_dir: temp_dir,
            next_id: AtomicU64::new(1),
            live: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` to a new file and return a local reference to it.
    pub async fn create(&self, bytes: &[u8], mime_type: &str) -> Result<MediaRef, StoryError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let path = self
            .root
            .join(format!("media-{id}.{}", extension_for(mime_type)));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StoryError::MediaWriteFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        self.lock_live().insert(id, path.clone());
        debug!("Created media {} ({} bytes) at {}", id, bytes.len(), path.display());
        Ok(MediaRef::Local {
            id,
            path,
            mime_type: mime_type.to_string(),
        })
    }

    /// Release a reference. Inline refs and already-released refs are ignored.
    pub async fn release(&self, media: &MediaRef) {
        let MediaRef::Local { id, path, .. } = media else {
            return;
        };
        if self.lock_live().remove(id).is_none() {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Failed to remove media file {}: {}", path.display(), e);
        } else {
            debug!("Released media {}", id);
        }
    }

    /// Copy a local reference out of the store, or write an inline data URI's
    /// payload, to `dest`.
    pub async fn persist(&self, media: &MediaRef, dest: &Path) -> Result<(), StoryError> {
        let write_err = |e: std::io::Error| StoryError::MediaWriteFailed {
            path: dest.to_path_buf(),
            reason: e.to_string(),
        };
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        match media {
            MediaRef::Local { path, .. } => {
                tokio::fs::copy(path, dest).await.map_err(write_err)?;
            }
            MediaRef::Inline { uri } => {
                let bytes = decode_data_uri(uri).ok_or_else(|| StoryError::MediaWriteFailed {
                    path: dest.to_path_buf(),
                    reason: "inline media is not a base64 data URI".into(),
                })?;
                tokio::fs::write(dest, bytes).await.map_err(write_err)?;
            }
        }
        Ok(())
    }

    /// Number of local references not yet released.
    pub fn live_count(&self) -> usize {
        self.lock_live().len()
    }

    fn lock_live(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PathBuf>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for MediaStore {
    /// Release whatever is still live. A temp-dir store is removed wholesale
    /// afterwards; a caller-supplied directory is left without our files.
    fn drop(&mut self) {
        let live = std::mem::take(&mut *self.lock_live());
        for (id, path) in live {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Released media {} on drop", id),
                Err(e) => warn!("Failed to remove media file {}: {}", path.display(), e),
            }
        }
    }
}

/// File extension for a media mime type.
pub fn extension_for(mime_type: &str) -> &'static str {
    let base = mime_type.split(';').next().unwrap_or("").trim();
    match base {
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/ogg" => "ogg",
        "audio/webm" => "webm",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

fn decode_data_uri(uri: &str) -> Option<Vec<u8>> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let rest = uri.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    if !meta.ends_with(";base64") {
        return None;
    }
    STANDARD.decode(payload).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_release_removes_file() {
        let store = MediaStore::new(None).unwrap();
        let media = store.create(b"fLaC....", "audio/flac").await.unwrap();
        let MediaRef::Local { ref path, .. } = media else {
            panic!("expected local ref");
        };
        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "flac");
        assert_eq!(store.live_count(), 1);

        store.release(&media).await;
        assert!(!path.exists());
        assert_eq!(store.live_count(), 0);

        // Second release is a no-op.
        store.release(&media).await;
        assert_eq!(store.live_count(), 0);
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let store = MediaStore::new(None).unwrap();
        let a = store.create(b"a", "audio/wav").await.unwrap();
        let b = store.create(b"b", "audio/wav").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.live_count(), 2);
    }

    #[tokio::test]
    async fn inline_release_is_noop() {
        let store = MediaStore::new(None).unwrap();
        store.release(&MediaRef::inline("data:image/png;base64,AAAA")).await;
        assert_eq!(store.live_count(), 0);
    }

    #[tokio::test]
    async fn persist_copies_local_and_decodes_inline() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(Some(&dir.path().join("media"))).unwrap();

        let media = store.create(b"RIFF-audio", "audio/wav").await.unwrap();
        let dest = dir.path().join("out/story.wav");
        store.persist(&media, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"RIFF-audio");

        let inline = MediaRef::inline("data:image/png;base64,aGk=");
        let dest2 = dir.path().join("image.png");
        store.persist(&inline, &dest2).await.unwrap();
        assert_eq!(std::fs::read(&dest2).unwrap(), b"hi");
    }

    #[tokio::test]
    async fn dropping_store_removes_live_files_from_media_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(Some(dir.path())).unwrap();
        let kept = store.create(b"a", "audio/flac").await.unwrap();
        let released = store.create(b"b", "audio/flac").await.unwrap();
        store.release(&released).await;

        let path = PathBuf::from(kept.location());
        assert!(path.exists());
        drop(store);

        assert!(!path.exists());
        assert!(dir.path().exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn extensions() {
        assert_eq!(extension_for("audio/flac"), "flac");
        assert_eq!(extension_for("audio/mpeg; charset=binary"), "mp3");
        assert_eq!(extension_for("application/octet-stream"), "bin");
    }

    #[test]
    fn blocking_create_via_tokio_test() {
        let store = MediaStore::new(None).unwrap();
        let media = tokio_test::block_on(store.create(b"x", "audio/ogg")).unwrap();
        assert!(media.location().ends_with(".ogg"));
    }
}
