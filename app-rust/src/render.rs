use crate::id_utils;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

pub const HTML_MEDIA_TYPE: &str = "text/html; charset=utf-8";

/// Policy attached to every served document. Scripts run, but in an opaque
/// origin with no access to the host page.
pub const SANDBOX_POLICY: &str = "sandbox allow-scripts";

const BLOB_ID_BYTES: usize = 12;

/// Route under which the fallback document is served.
pub const DEFAULT_DOCUMENT_PATH: &str = "/surface/default";

/// Shown whenever there is no artifact to display.
pub const DEFAULT_DOCUMENT: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>
  html, body { margin: 0; height: 100%; background: #050505; color: #9ca3af; }
  body { display: flex; align-items: center; justify-content: center;
         font-family: ui-monospace, monospace; letter-spacing: 0.08em; }
  .hint { text-align: center; }
  .hint strong { display: block; color: #e5e7eb; margin-bottom: 0.5rem; }
</style>
</head>
<body>
  <div class="hint">
    <strong>No visualization loaded</strong>
    Upload a research paper (PDF) to generate one.
  </div>
</body>
</html>
"#;

/// A transient document held in memory until its [`ObjectUrl`] is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub body: Arc<str>,
    pub media_type: &'static str,
}

/// In-memory registry of transient documents addressed by random ids.
#[derive(Debug, Default)]
pub struct BlobStore {
    blobs: Mutex<HashMap<String, Blob>>,
}

impl BlobStore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a document and return the guard that keeps it alive.
    pub fn create(self: &Arc<Self>, body: &str, media_type: &'static str) -> ObjectUrl {
        let id = id_utils::random_hex_id(BLOB_ID_BYTES);
        self.lock().insert(
            id.clone(),
            Blob {
                body: Arc::from(body),
                media_type,
            },
        );
        tracing::debug!(blob_id = %id, bytes = body.len(), "created object url");
        ObjectUrl {
            id,
            store: Arc::clone(self),
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Blob> {
        self.lock().get(id).cloned()
    }

    /// Number of documents currently addressable.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    fn revoke(&self, id: &str) {
        if self.lock().remove(id).is_some() {
            tracing::debug!(blob_id = %id, "revoked object url");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Blob>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Address of a registered document. Dropping it revokes the entry.
#[derive(Debug)]
pub struct ObjectUrl {
    id: String,
    store: Arc<BlobStore>,
}

impl ObjectUrl {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn path(&self) -> String {
        format!("/blob/{}", self.id)
    }
}

impl Drop for ObjectUrl {
    fn drop(&mut self) {
        self.store.revoke(&self.id);
    }
}

/// The isolated display region. Holds at most one live object URL.
#[derive(Debug)]
pub struct RenderSurface {
    store: Arc<BlobStore>,
    current: Option<ObjectUrl>,
}

impl RenderSurface {
    #[must_use]
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self {
            store,
            current: None,
        }
    }

    /// Display a new document, releasing the previous one.
    pub fn show(&mut self, html: &str) -> String {
        // Release before creating so that two blobs are never live together.
        self.current = None;
        let url = self.store.create(html, HTML_MEDIA_TYPE);
        let path = url.path();
        self.current = Some(url);
        path
    }

    /// Return to the fallback document.
    pub fn clear(&mut self) {
        self.current = None;
    }

    /// What the display region currently points at.
    #[must_use]
    pub fn current_url(&self) -> String {
        self.current
            .as_ref()
            .map_or_else(|| DEFAULT_DOCUMENT_PATH.to_string(), ObjectUrl::path)
    }

    #[must_use]
    pub fn has_document(&self) -> bool {
        self.current.is_some()
    }
}
