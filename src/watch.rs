//! File system watching for file-backed layers.
//!
//! Native watch callbacks arrive on the `notify` backend's own thread. They
//! are forwarded over a channel to a dedicated reload thread which debounces
//! bursts and then runs the layer's reload callback. Layers therefore see one
//! reload per burst of external edits, on a thread they do not own.

use std::{
    collections::HashSet,
    io,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Errors raised while setting up a file watch.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Failed to initialize the native watcher
    #[error("failed to initialize file watcher: {0}")]
    Init(#[from] notify::Error),

    /// The watched file has no parent directory
    #[error("cannot watch '{0}': no parent directory")]
    NoParent(PathBuf),

    /// Failed to start the reload thread
    #[error("failed to start reload thread: {0}")]
    Thread(#[from] io::Error),
}

/// Represents a file system event for a watched file.
#[derive(Debug, Clone)]
pub struct FileEvent {
    /// The path of the file that changed
    pub path: PathBuf,
    /// The type of change that occurred
    pub kind: FileEventKind,
}

/// The type of file system change that occurred.
#[derive(Debug, Clone, PartialEq)]
pub enum FileEventKind {
    /// File was modified
    Modified,
    /// File was created
    Created,
    /// File was removed
    Removed,
}

/// Watches individual files through their parent directories.
///
/// Layers replace their backing files with an atomic rename, which would
/// orphan a watch on the file's inode; watching the directory and filtering
/// by file name survives that.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    directories: HashSet<PathBuf>,
}

impl FileWatcher {
    /// Creates a watcher and the receiver its events are delivered on.
    ///
    /// Only events for `files` are forwarded.
    ///
    /// # Errors
    /// Returns error if the underlying file system watcher cannot be initialized.
    pub fn new(
        files: Vec<PathBuf>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<FileEvent>), WatchError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let files: Vec<PathBuf> = files.into_iter().map(normalize).collect();
        let wanted: HashSet<PathBuf> = files.iter().cloned().collect();

        let watcher = recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else {
                return;
            };

            let kind = match event.kind {
                EventKind::Create(_) => FileEventKind::Created,
                EventKind::Modify(_) => FileEventKind::Modified,
                EventKind::Remove(_) => FileEventKind::Removed,
                _ => return,
            };

            for path in event.paths {
                if !wanted.contains(&path) {
                    continue;
                }
                let _ = event_tx.send(FileEvent {
                    path,
                    kind: kind.clone(),
                });
            }
        })?;

        let mut file_watcher = Self {
            watcher,
            directories: HashSet::new(),
        };

        for file in &files {
            file_watcher.watch_parent(file)?;
        }

        Ok((file_watcher, event_rx))
    }

    fn watch_parent(&mut self, file: &Path) -> Result<(), WatchError> {
        let parent = file
            .parent()
            .ok_or_else(|| WatchError::NoParent(file.to_path_buf()))?;

        if self.directories.contains(parent) {
            return Ok(());
        }

        self.watcher.watch(parent, RecursiveMode::NonRecursive)?;
        self.directories.insert(parent.to_path_buf());

        Ok(())
    }
}

/// Resolves symlinks in the parent directory so paths compare equal to
/// the ones the native backend reports.
fn normalize(file: PathBuf) -> PathBuf {
    let (Some(parent), Some(name)) = (file.parent(), file.file_name()) else {
        return file;
    };

    match parent.canonicalize() {
        Ok(parent) => parent.join(name),
        Err(_) => file,
    }
}

/// A running reload thread; stops when dropped.
pub struct ReloadTask {
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ReloadTask {
    /// Starts watching `files` and calls `reload` once per debounced burst.
    ///
    /// Files must be absolute and their parent directories must exist.
    ///
    /// # Errors
    /// Returns error if the watcher or its thread cannot be started.
    pub fn spawn<F>(
        name: &str,
        files: Vec<PathBuf>,
        debounce: Duration,
        mut reload: F,
    ) -> Result<Self, WatchError>
    where
        F: FnMut() + Send + 'static,
    {
        let (watcher, mut event_rx) = FileWatcher::new(files)?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let thread_name = format!("{name}-watch");

        let thread = thread::Builder::new().name(thread_name).spawn(move || {
            let _watcher = watcher;
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!("Failed to create watch runtime: {e}");
                    return;
                }
            };

            runtime.block_on(async move {
                let mut pending = false;
                let debounce_sleep = tokio::time::sleep(debounce);
                tokio::pin!(debounce_sleep);

                loop {
                    tokio::select! {
                        _ = &mut shutdown_rx => break,

                        event = event_rx.recv() => {
                            let Some(event) = event else { break };
                            debug!(path = %event.path.display(), kind = ?event.kind, "watched file changed");
                            pending = true;
                            debounce_sleep.as_mut().reset(tokio::time::Instant::now() + debounce);
                        }

                        _ = &mut debounce_sleep, if pending => {
                            pending = false;
                            reload();
                        }
                    }
                }
            });
        })?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

impl Drop for ReloadTask {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

/// Writes `contents` to `path` through a sibling temp file and a rename, so
/// readers never observe a half-written file.
///
/// # Errors
/// Returns error if the directory cannot be created or the file written.
pub fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));

    std::fs::write(&temp, contents)?;
    std::fs::rename(&temp, path)
}

/// Exclusive advisory lock on `<file>.lock`, shared by every process that
/// reads and rewrites `file`. Released on drop; the lock file stays.
#[derive(Debug)]
pub struct FileLock {
    file: std::fs::File,
}

impl FileLock {
    const POLL_INTERVAL: Duration = Duration::from_millis(10);

    /// Blocks until the lock guarding `path` is held, or `timeout` elapses.
    ///
    /// # Errors
    /// Returns error if the lock file cannot be created, or
    /// `io::ErrorKind::TimedOut` if another holder keeps it past `timeout`.
    pub fn acquire(path: &Path, timeout: Duration) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let lock_path = path.with_file_name(format!(".{file_name}.lock"));

        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;

        let deadline = Instant::now() + timeout;
        loop {
            if try_flock(&file, libc::LOCK_EX | libc::LOCK_NB) {
                return Ok(Self { file });
            }

            let error = io::Error::last_os_error();
            if error.raw_os_error() != Some(libc::EWOULDBLOCK) {
                return Err(error);
            }
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("timed out waiting for {}", lock_path.display()),
                ));
            }
            thread::sleep(Self::POLL_INTERVAL);
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        try_flock(&self.file, libc::LOCK_UN);
    }
}

#[allow(unsafe_code)]
fn try_flock(file: &std::fs::File, operation: libc::c_int) -> bool {
    // SAFETY: the descriptor is owned by `file` and open for the whole call.
    unsafe { libc::flock(file.as_raw_fd(), operation) == 0 }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("store.toml");

        let held = FileLock::acquire(&file, Duration::from_millis(50)).unwrap();
        let blocked = FileLock::acquire(&file, Duration::from_millis(50)).unwrap_err();
        assert_eq!(blocked.kind(), io::ErrorKind::TimedOut);

        drop(held);
        assert!(FileLock::acquire(&file, Duration::from_millis(50)).is_ok());
        assert!(!file.exists());
    }

    #[test]
    fn atomic_writes_replace_the_whole_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("nested").join("hive.json");

        write_atomically(&file, b"first, longer contents").unwrap();
        write_atomically(&file, b"second").unwrap();

        assert_eq!(std::fs::read(&file).unwrap(), b"second");
    }
}
