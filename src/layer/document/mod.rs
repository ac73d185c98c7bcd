//! Document store layer.
//!
//! Settings live in typed documents, one document per identifier. A path
//! splits into a dotted identifier (every segment but the last) and a
//! setting name (the last segment): `/Device/Network/Up` is setting `Up` of
//! document `Device.Network`. Reads and writes are requests to a
//! [`DocumentService`]; the calling thread blocks on the response future.
//!
//! By default the layer only reads and updates existing documents.
//! Creating and removing whole documents is enabled with `allow_create`.

mod query;
mod service;

use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, Weak},
    thread,
};

use futures::executor::block_on;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

pub use query::Query;
pub use service::{
    Document, DocumentChanged, DocumentRequest, DocumentResponse, DocumentService,
    JsonDocumentService, ResponseFuture,
};

use super::{
    DOCUMENT_STORE_LAYER, EVENT_CAPACITY, Handle, HandleTable, Layer, LayerEvent, LayerId,
    LayerOptions, WriterId, emit_changes,
};
use crate::{Path, PathEncoding, Value};

/// Errors from the document service.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// A query string is malformed
    #[error("invalid query '{query}': {reason}")]
    Query {
        /// The offending query
        query: String,
        /// What is wrong with it
        reason: String,
    },

    /// A document with the same type and identifier exists
    #[error("document '{0}' already exists")]
    Duplicate(String),

    /// Reading or writing the document file failed
    #[error("I/O error on '{path}': {details}")]
    Io {
        /// Path of the document file
        path: PathBuf,
        /// I/O error details
        details: String,
    },

    /// The document file is not a document array
    #[error("corrupt document file '{path}': {details}")]
    Corrupt {
        /// Path of the document file
        path: PathBuf,
        /// Parse error details
        details: String,
    },

    /// Serializing documents failed
    #[error("failed to serialize documents: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The service stopped answering
    #[error("document service is gone")]
    Disconnected,

    /// The service worker could not be started
    #[error("failed to start document worker: {0}")]
    Worker(String),

    /// The service answered with the wrong kind of response
    #[error("unexpected response from document service")]
    UnexpectedResponse,
}

/// Settings for a [`DocumentLayer`].
#[derive(Debug, Clone)]
pub struct DocumentSettings {
    /// Document type this layer reads and writes.
    pub document_type: String,
    /// Priority rank.
    pub order: u32,
    /// Whether writes may create documents and removals may delete them.
    pub allow_create: bool,
}

impl DocumentSettings {
    /// Default priority rank of the document store.
    pub const DEFAULT_ORDER: u32 = 500;
    /// Default document type.
    pub const DEFAULT_TYPE: &'static str = "valuespace.settings";
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            document_type: Self::DEFAULT_TYPE.to_string(),
            order: Self::DEFAULT_ORDER,
            allow_create: false,
        }
    }
}

/// A path split into its document identifier and setting name.
struct SettingRef {
    identifier: String,
    setting: String,
}

impl SettingRef {
    fn from_path(path: &Path) -> Option<Self> {
        let setting = path.last()?.to_string();
        let parent = path.parent();
        if parent.is_root() {
            return None;
        }
        Some(Self {
            identifier: identifier_of(&parent)?,
            setting,
        })
    }
}

fn identifier_of(path: &Path) -> Option<String> {
    path.with_encoding(PathEncoding::Dot)
        .ok()
        .map(|dotted| dotted.to_string())
}

fn identifier_path(identifier: &str) -> Option<Path> {
    Path::parse_dotted(identifier)
        .and_then(|dotted| dotted.with_encoding(PathEncoding::Slash))
        .ok()
}

struct DocumentShared {
    service: Arc<dyn DocumentService>,
    settings: DocumentSettings,
    handles: Mutex<HandleTable<()>>,
    events: broadcast::Sender<LayerEvent>,
}

impl DocumentShared {
    fn lock(&self) -> MutexGuard<'_, HandleTable<()>> {
        match self.handles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn call(&self, request: DocumentRequest) -> Result<DocumentResponse, DocumentError> {
        block_on(self.service.request(request))
    }

    fn query(&self, query: Query) -> Result<Vec<Document>, DocumentError> {
        match self.call(DocumentRequest::Query {
            query: query.to_string(),
        })? {
            DocumentResponse::Documents(documents) => Ok(documents),
            DocumentResponse::Affected(_) => Err(DocumentError::UnexpectedResponse),
        }
    }

    fn affected(&self, request: DocumentRequest) -> Result<usize, DocumentError> {
        match self.call(request)? {
            DocumentResponse::Affected(count) => Ok(count),
            DocumentResponse::Documents(_) => Err(DocumentError::UnexpectedResponse),
        }
    }

    fn of_type(&self) -> Query {
        Query::of_type(&self.settings.document_type)
    }

    /// Every stored setting as a full path.
    fn all_setting_paths(&self) -> Vec<Path> {
        let documents = match self.query(self.of_type()) {
            Ok(documents) => documents,
            Err(e) => {
                warn!("Failed to list documents: {e}");
                return Vec::new();
            }
        };

        documents
            .iter()
            .filter_map(|document| {
                let base = identifier_path(&document.identifier)?;
                Some(document.settings.keys().map(move |name| base.child(name)))
            })
            .flatten()
            .collect()
    }

    fn notify(&self, change: DocumentChanged) {
        if change.document_type != self.settings.document_type {
            return;
        }
        let Some(path) = identifier_path(&change.identifier) else {
            return;
        };

        let handles = self.lock();
        emit_changes(&handles, &self.events, &[path], false);
    }
}

/// Permanent, writable layer backed by a [`DocumentService`].
pub struct DocumentLayer {
    shared: Arc<DocumentShared>,
}

impl DocumentLayer {
    /// Wraps `service` as a layer.
    ///
    /// # Errors
    /// Returns `DocumentError::Worker` if the notification thread cannot
    /// start.
    pub fn new(
        service: Arc<dyn DocumentService>,
        settings: DocumentSettings,
    ) -> Result<Self, DocumentError> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut notifications = service.notifications();

        info!(
            document_type = %settings.document_type,
            allow_create = settings.allow_create,
            "Document store layer ready"
        );

        let shared = Arc::new(DocumentShared {
            service,
            settings,
            handles: Mutex::new(HandleTable::new()),
            events,
        });

        let weak: Weak<DocumentShared> = Arc::downgrade(&shared);
        thread::Builder::new()
            .name("document-events".to_string())
            .spawn(move || {
                loop {
                    let change = match notifications.blocking_recv() {
                        Ok(change) => change,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Document notifications lagged");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };
                    let Some(shared) = weak.upgrade() else {
                        break;
                    };
                    shared.notify(change);
                }
                debug!("Document notification forwarding stopped");
            })
            .map_err(|e| DocumentError::Worker(e.to_string()))?;

        Ok(Self { shared })
    }

    /// Opens a JSON document file as a layer.
    ///
    /// # Errors
    /// Returns `DocumentError` if the file is unreadable or a worker cannot
    /// start.
    pub fn open_file(
        file: impl Into<PathBuf>,
        settings: DocumentSettings,
    ) -> Result<Self, DocumentError> {
        let service = JsonDocumentService::open(file)?;
        Self::new(Arc::new(service), settings)
    }

    fn resolve(&self, handle: Handle, sub_path: &Path) -> Option<Path> {
        self.shared
            .lock()
            .path(handle)
            .map(|base| base.join(sub_path))
    }

    fn remove_documents_under(&self, path: &Path) -> bool {
        if !self.shared.settings.allow_create {
            debug!(path = %path, "Document removal is disabled");
            return false;
        }

        let documents = match self.shared.query(self.shared.of_type()) {
            Ok(documents) => documents,
            Err(e) => {
                warn!("Failed to list documents: {e}");
                return false;
            }
        };

        let mut removed = false;
        for document in documents {
            let inside = identifier_path(&document.identifier)
                .is_some_and(|identifier| path.includes(&identifier));
            if !inside {
                continue;
            }

            let request = DocumentRequest::Remove {
                query: self
                    .shared
                    .of_type()
                    .with_identifier(&document.identifier)
                    .to_string(),
                settings: Vec::new(),
            };
            match self.shared.affected(request) {
                Ok(count) => removed |= count > 0,
                Err(e) => warn!(identifier = %document.identifier, "Failed to remove document: {e}"),
            }
        }
        removed
    }
}

impl Layer for DocumentLayer {
    fn id(&self) -> LayerId {
        DOCUMENT_STORE_LAYER
    }

    fn name(&self) -> &str {
        "Document Store Layer"
    }

    fn order(&self) -> u32 {
        self.shared.settings.order
    }

    fn options(&self) -> LayerOptions {
        LayerOptions::PERMANENT | LayerOptions::WRITABLE
    }

    fn open(&self, parent: Option<Handle>, path: &Path) -> Option<Handle> {
        let mut handles = self.shared.lock();
        let absolute = match parent {
            Some(parent) => handles.path(parent)?.join(path),
            None => path.clone(),
        };

        if identifier_of(&absolute).is_none() {
            debug!(path = %absolute, "Path has no document form");
            return None;
        }

        handles.acquire(absolute, |_| Some(()))
    }

    fn release(&self, handle: Handle) {
        self.shared.lock().release(handle);
    }

    fn read_value(&self, handle: Handle, sub_path: &Path) -> Option<Value> {
        let target = SettingRef::from_path(&self.resolve(handle, sub_path)?)?;
        let query = self.shared.of_type().with_identifier(&target.identifier);

        match self.shared.query(query) {
            Ok(documents) => documents
                .into_iter()
                .find_map(|mut document| document.settings.remove(&target.setting)),
            Err(e) => {
                warn!(identifier = %target.identifier, "Document query failed: {e}");
                None
            }
        }
    }

    fn children(&self, handle: Handle) -> BTreeSet<String> {
        let Some(base) = self.shared.lock().path(handle).cloned() else {
            return BTreeSet::new();
        };

        self.shared
            .all_setting_paths()
            .into_iter()
            .filter_map(|path| path.strip_prefix(&base)?.segments().first().cloned())
            .collect()
    }

    fn write_value(&self, _writer: &WriterId, handle: Handle, sub_path: &Path, value: Value) -> bool {
        let Some(path) = self.resolve(handle, sub_path) else {
            return false;
        };
        let Some(target) = SettingRef::from_path(&path) else {
            warn!(path = %path, "Document settings need an identifier and a name");
            return false;
        };

        let query = self.shared.of_type().with_identifier(&target.identifier);
        let allow_create = self.shared.settings.allow_create;
        let update = DocumentRequest::Update {
            query: query.to_string(),
            settings: BTreeMap::from([(target.setting.clone(), value.clone())]),
            create_missing: allow_create,
        };

        match self.shared.affected(update) {
            Ok(count) if count > 0 => return true,
            Ok(_) => {}
            Err(e) => {
                warn!(path = %path, "Document update failed: {e}");
                return false;
            }
        }

        // Nothing changed: the value was already stored, the setting is
        // new and creation is disabled, or the document does not exist.
        match self.shared.query(query) {
            Ok(documents) if !documents.is_empty() => {
                let stored = documents
                    .iter()
                    .any(|document| document.settings.contains_key(&target.setting));
                if !stored {
                    warn!(path = %path, "Setting does not exist and creation is disabled");
                }
                return stored;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(path = %path, "Document query failed: {e}");
                return false;
            }
        }

        if !allow_create {
            warn!(identifier = %target.identifier, "Document does not exist and creation is disabled");
            return false;
        }

        let mut document = Document::new(&self.shared.settings.document_type, &target.identifier);
        document.settings.insert(target.setting, value);

        match self.shared.affected(DocumentRequest::Create { document }) {
            Ok(_) => true,
            Err(e) => {
                warn!(path = %path, "Document creation failed: {e}");
                false
            }
        }
    }

    fn remove_value(&self, _writer: &WriterId, handle: Handle, sub_path: &Path) -> bool {
        let Some(path) = self.resolve(handle, sub_path) else {
            return false;
        };

        let mut removed = false;
        if let Some(target) = SettingRef::from_path(&path) {
            let request = DocumentRequest::Remove {
                query: self
                    .shared
                    .of_type()
                    .with_identifier(&target.identifier)
                    .to_string(),
                settings: vec![target.setting],
            };
            match self.shared.affected(request) {
                Ok(count) => removed = count > 0,
                Err(e) => warn!(path = %path, "Document setting removal failed: {e}"),
            }
        }

        self.remove_documents_under(&path) || removed
    }

    fn remove_subtree(&self, writer: &WriterId, handle: Handle) -> bool {
        self.remove_value(writer, handle, &Path::default())
    }

    fn sync(&self) {
        // Mutations are persisted before the service replies.
    }

    fn events(&self) -> broadcast::Receiver<LayerEvent> {
        self.shared.events.subscribe()
    }
}

#[cfg(test)]
mod tests;
