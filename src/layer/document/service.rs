use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path as FsPath, PathBuf},
    pin::Pin,
    task::{Context, Poll},
    thread,
};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{DocumentError, Query};
use crate::{Value, layer::EVENT_CAPACITY, watch::write_atomically};

/// One stored document: a typed, identified bag of settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique id assigned on creation.
    #[serde(rename = "_id")]
    pub id: Uuid,
    /// Document type.
    #[serde(rename = "_type")]
    pub document_type: String,
    /// Dotted identifier.
    pub identifier: String,
    /// Setting name to value.
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

impl Document {
    /// An empty document with a fresh id.
    pub fn new(document_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_type: document_type.into(),
            identifier: identifier.into(),
            settings: BTreeMap::new(),
        }
    }
}

/// A request to a document service. Queries travel in text form.
#[derive(Debug, Clone)]
pub enum DocumentRequest {
    /// Fetch every matching document.
    Query {
        /// Selector text
        query: String,
    },
    /// Merge `settings` into every matching document.
    Update {
        /// Selector text
        query: String,
        /// Settings to set
        settings: BTreeMap<String, Value>,
        /// Whether settings a document does not have yet are added
        create_missing: bool,
    },
    /// Store a new document.
    Create {
        /// The document to store
        document: Document,
    },
    /// Drop `settings` from matching documents, or the documents themselves
    /// when `settings` is empty.
    Remove {
        /// Selector text
        query: String,
        /// Setting names to drop
        settings: Vec<String>,
    },
}

/// Successful answer to a [`DocumentRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentResponse {
    /// Matching documents.
    Documents(Vec<Document>),
    /// Number of documents that changed.
    Affected(usize),
}

/// Change notification from a document service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChanged {
    /// Type of the changed document
    pub document_type: String,
    /// Identifier of the changed document
    pub identifier: String,
}

type Reply = oneshot::Sender<Result<DocumentResponse, DocumentError>>;

/// Pending answer to a request.
pub struct ResponseFuture {
    rx: oneshot::Receiver<Result<DocumentResponse, DocumentError>>,
}

impl ResponseFuture {
    /// A future that resolves immediately with `result`.
    pub fn ready(result: Result<DocumentResponse, DocumentError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for ResponseFuture {
    type Output = Result<DocumentResponse, DocumentError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(DocumentError::Disconnected)))
    }
}

/// A document store reachable through requests and response futures.
pub trait DocumentService: Send + Sync {
    /// Queues `request`; the answer arrives through the returned future.
    fn request(&self, request: DocumentRequest) -> ResponseFuture;

    /// Subscribes to change notifications.
    fn notifications(&self) -> broadcast::Receiver<DocumentChanged>;
}

/// Document service persisting a JSON array of documents.
///
/// All requests are served in order by one worker thread; mutations are
/// written to disk before the reply is sent.
pub struct JsonDocumentService {
    requests: mpsc::UnboundedSender<(DocumentRequest, Reply)>,
    notifications: broadcast::Sender<DocumentChanged>,
}

impl JsonDocumentService {
    /// Loads `file` and starts the worker.
    ///
    /// # Errors
    /// Returns `DocumentError` if the file exists but is not a document
    /// array, or the worker thread cannot start.
    pub fn open(file: impl Into<PathBuf>) -> Result<Self, DocumentError> {
        let file = file.into();
        let documents = load(&file)?;
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(EVENT_CAPACITY);

        let mut worker = Worker {
            file,
            documents,
            notifications: notifications.clone(),
        };
        info!(documents = worker.documents.len(), file = %worker.file.display(), "Document service ready");

        thread::Builder::new()
            .name("document-store".to_string())
            .spawn(move || worker.run(request_rx))
            .map_err(|e| DocumentError::Worker(e.to_string()))?;

        Ok(Self {
            requests,
            notifications,
        })
    }
}

impl DocumentService for JsonDocumentService {
    fn request(&self, request: DocumentRequest) -> ResponseFuture {
        let (tx, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError((_, tx))) = self.requests.send((request, tx)) {
            let _ = tx.send(Err(DocumentError::Disconnected));
        }
        ResponseFuture { rx }
    }

    fn notifications(&self) -> broadcast::Receiver<DocumentChanged> {
        self.notifications.subscribe()
    }
}

struct Worker {
    file: PathBuf,
    documents: Vec<Document>,
    notifications: broadcast::Sender<DocumentChanged>,
}

impl Worker {
    fn run(&mut self, mut requests: mpsc::UnboundedReceiver<(DocumentRequest, Reply)>) {
        while let Some((request, reply)) = requests.blocking_recv() {
            let _ = reply.send(self.handle(request));
        }
        debug!("Document service stopped");
    }

    fn handle(&mut self, request: DocumentRequest) -> Result<DocumentResponse, DocumentError> {
        match request {
            DocumentRequest::Query { query } => {
                let query = Query::parse(&query)?;
                Ok(DocumentResponse::Documents(
                    self.documents
                        .iter()
                        .filter(|document| query.matches(document))
                        .cloned()
                        .collect(),
                ))
            }
            DocumentRequest::Update {
                query,
                settings,
                create_missing,
            } => {
                let query = Query::parse(&query)?;
                self.mutate(|documents| {
                    let mut changed = Vec::new();
                    for document in documents.iter_mut().filter(|d| query.matches(d)) {
                        let before = document.settings.clone();
                        for (name, value) in &settings {
                            if create_missing || before.contains_key(name) {
                                document.settings.insert(name.clone(), value.clone());
                            }
                        }
                        if document.settings != before {
                            changed.push(notice(document));
                        }
                    }
                    changed
                })
            }
            DocumentRequest::Create { document } => {
                let duplicate = self.documents.iter().any(|existing| {
                    existing.document_type == document.document_type
                        && existing.identifier == document.identifier
                });
                if duplicate {
                    return Err(DocumentError::Duplicate(document.identifier));
                }

                self.mutate(|documents| {
                    let changed = vec![notice(&document)];
                    documents.push(document);
                    changed
                })
            }
            DocumentRequest::Remove { query, settings } => {
                let query = Query::parse(&query)?;
                self.mutate(|documents| {
                    let mut changed = Vec::new();
                    if settings.is_empty() {
                        documents.retain(|document| {
                            if query.matches(document) {
                                changed.push(notice(document));
                                return false;
                            }
                            true
                        });
                        return changed;
                    }

                    for document in documents.iter_mut().filter(|d| query.matches(d)) {
                        let before = document.settings.len();
                        document.settings.retain(|name, _| !settings.contains(name));
                        if document.settings.len() != before {
                            changed.push(notice(document));
                        }
                    }
                    changed
                })
            }
        }
    }

    /// Applies `op`, persists if anything changed and announces the changes.
    fn mutate(
        &mut self,
        op: impl FnOnce(&mut Vec<Document>) -> Vec<DocumentChanged>,
    ) -> Result<DocumentResponse, DocumentError> {
        let mut next = self.documents.clone();
        let changed = op(&mut next);
        if changed.is_empty() {
            return Ok(DocumentResponse::Affected(0));
        }

        save(&self.file, &next)?;
        self.documents = next;

        for change in &changed {
            let _ = self.notifications.send(change.clone());
        }
        Ok(DocumentResponse::Affected(changed.len()))
    }
}

fn notice(document: &Document) -> DocumentChanged {
    DocumentChanged {
        document_type: document.document_type.clone(),
        identifier: document.identifier.clone(),
    }
}

fn load(file: &FsPath) -> Result<Vec<Document>, DocumentError> {
    match fs::read_to_string(file) {
        Ok(text) if text.trim().is_empty() => Ok(Vec::new()),
        Ok(text) => serde_json::from_str(&text).map_err(|e| DocumentError::Corrupt {
            path: file.to_path_buf(),
            details: e.to_string(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(DocumentError::Io {
            path: file.to_path_buf(),
            details: e.to_string(),
        }),
    }
}

fn save(file: &FsPath, documents: &[Document]) -> Result<(), DocumentError> {
    let contents = serde_json::to_vec_pretty(documents)?;
    write_atomically(file, &contents).map_err(|e| {
        warn!(file = %file.display(), "Failed to persist documents: {e}");
        DocumentError::Io {
            path: file.to_path_buf(),
            details: e.to_string(),
        }
    })
}
