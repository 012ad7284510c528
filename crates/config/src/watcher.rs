use crate::store::ConfigStore;
use hotconf_types::{ConfigError, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher as _, event::ModifyKind};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// Capacity of the per-watcher event broadcast channel.
const EVENT_CAPACITY: usize = 16;

/// Lifecycle notifications emitted by a running watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A write event was seen and the store reloaded successfully.
    Reloaded,
    /// A write event was seen but the reload failed; the previous document
    /// is still in place.
    ReloadFailed(String),
    /// The filesystem watcher reported an error. Watching continues.
    Error(String),
    /// A watched file was removed or renamed away, typically by an editor
    /// replacing it with a new file. Its watch no longer fires; the store
    /// keeps the last document it loaded.
    Detached(PathBuf),
    /// The watch loop exited and the subscription was closed.
    Stopped,
}

/// Attaches live file watching to a [`ConfigStore`].
pub struct ConfigWatcher;

impl ConfigWatcher {
    /// Watches every file of `store` and reloads it on each write event.
    ///
    /// A store with no loaded files gets an inert handle with no background
    /// task. Otherwise one tokio task is spawned on the current runtime; it
    /// runs until the returned [`WatchHandle`] is stopped or dropped.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::RuntimeUnavailable`] outside of a tokio runtime.
    /// - [`ConfigError::WatchInit`] if the OS watcher cannot be created.
    /// - [`ConfigError::WatchPath`] if a file cannot be registered. Files
    ///   registered before the failure are released again.
    pub fn watch(store: Arc<ConfigStore>) -> Result<WatchHandle> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let cancel = CancellationToken::new();

        if store.loaded_files().is_empty() {
            return Ok(WatchHandle {
                cancel,
                events,
                watched: HashMap::new(),
                task: None,
            });
        }

        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ConfigError::RuntimeUnavailable)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })
        .map_err(ConfigError::WatchInit)?;

        let mut watched = HashMap::new();
        for path in store.loaded_files() {
            let absolute = path
                .canonicalize()
                .map_err(|e| ConfigError::WatchPath {
                    path: path.clone(),
                    source: notify::Error::io(e),
                })?;
            watcher
                .watch(&absolute, RecursiveMode::NonRecursive)
                .map_err(|source| ConfigError::WatchPath {
                    path: path.clone(),
                    source,
                })?;
            watched.insert(absolute, true);
        }

        tracing::info!(files = ?store.loaded_files(), "config watcher started");

        let task = runtime.spawn(watch_loop(
            watcher,
            rx,
            store,
            events.clone(),
            cancel.clone(),
        ));

        Ok(WatchHandle {
            cancel,
            events,
            watched,
            task: Some(task),
        })
    }
}

/// Owns a running watcher. Dropping the handle cancels the watch loop.
#[derive(Debug)]
pub struct WatchHandle {
    cancel: CancellationToken,
    events: broadcast::Sender<WatchEvent>,
    /// Absolute path -> "is being watched", fixed at startup.
    watched: HashMap<PathBuf, bool>,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Subscribes to events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    /// Absolute paths registered at startup.
    #[must_use]
    pub fn watched_files(&self) -> &HashMap<PathBuf, bool> {
        &self.watched
    }

    /// Returns `true` if `path` was registered when the watcher started.
    #[must_use]
    pub fn is_watching(&self, path: &Path) -> bool {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.watched.get(&key).copied().unwrap_or(false)
    }

    /// Returns `true` while the background task is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancels the watch loop and waits for it to close the subscription.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "config watcher task ended abnormally");
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn watch_loop(
    watcher: notify::RecommendedWatcher,
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    store: Arc<ConfigStore>,
    events: broadcast::Sender<WatchEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(Ok(event)) if is_write(event.kind) => {
                    let _ = events.send(reload(&store).await);
                }
                Some(Ok(event)) if is_detach(event.kind) => {
                    for path in event.paths {
                        tracing::warn!(
                            path = %path.display(),
                            "watched config file was removed or replaced, edits to it are no longer picked up"
                        );
                        let _ = events.send(WatchEvent::Detached(path));
                    }
                }
                Some(Ok(event)) => {
                    tracing::trace!(kind = ?event.kind, paths = ?event.paths, "ignoring file event");
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "config watcher error");
                    let _ = events.send(WatchEvent::Error(e.to_string()));
                }
                None => break,
            },
        }
    }

    drop(watcher);
    tracing::info!(files = ?store.loaded_files(), "config watcher stopped");
    let _ = events.send(WatchEvent::Stopped);
}

async fn reload(store: &Arc<ConfigStore>) -> WatchEvent {
    let store = Arc::clone(store);
    match tokio::task::spawn_blocking(move || store.reload()).await {
        Ok(Ok(())) => WatchEvent::Reloaded,
        Ok(Err(e)) => {
            let report = e.report();
            tracing::warn!(error = %report, "config reload failed, keeping previous configuration");
            WatchEvent::ReloadFailed(report)
        }
        Err(e) => {
            tracing::warn!(error = %e, "config reload task failed");
            WatchEvent::ReloadFailed(e.to_string())
        }
    }
}

fn is_write(kind: EventKind) -> bool {
    matches!(kind, EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any))
}

/// The watched inode is gone, so the OS watch on it is too.
fn is_detach(kind: EventKind) -> bool {
    matches!(kind, EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{
        AccessKind, AccessMode, CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode,
    };
    use std::io::Write as _;
    use std::time::Duration;

    fn write_config(path: &Path, content: &str) {
        std::fs::write(path, content).unwrap();
    }

    async fn next_event(rx: &mut broadcast::Receiver<WatchEvent>) -> WatchEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for watch event")
            .unwrap()
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        for _ in 0..40 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        cond()
    }

    #[test]
    fn test_is_write() {
        assert!(is_write(EventKind::Modify(ModifyKind::Data(
            DataChange::Content
        ))));
        assert!(is_write(EventKind::Modify(ModifyKind::Any)));
        assert!(!is_write(EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Permissions
        ))));
        assert!(!is_write(EventKind::Create(CreateKind::File)));
        assert!(!is_write(EventKind::Access(AccessKind::Close(
            AccessMode::Write
        ))));
    }

    #[test]
    fn test_is_detach() {
        assert!(is_detach(EventKind::Remove(RemoveKind::File)));
        assert!(is_detach(EventKind::Modify(ModifyKind::Name(RenameMode::From))));
        assert!(!is_detach(EventKind::Modify(ModifyKind::Data(
            DataChange::Content
        ))));
        assert!(!is_detach(EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Any
        ))));
    }

    #[test]
    fn test_watch_requires_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path, "port: 1\n");
        let store = Arc::new(ConfigStore::load_yaml([&path]).unwrap());

        let err = ConfigWatcher::watch(store).unwrap_err();
        assert!(matches!(err, ConfigError::RuntimeUnavailable));
    }

    #[test]
    fn test_watch_without_files_is_inert() {
        let store = Arc::new(ConfigStore::load_json(Vec::<PathBuf>::new()).unwrap());
        let handle = ConfigWatcher::watch(store).unwrap();
        assert!(!handle.is_active());
        assert!(handle.watched_files().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_write_triggers_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        write_config(&path, r#"{"a": {"b": 1}}"#);
        let store = Arc::new(ConfigStore::load_json([&path]).unwrap());

        let handle = ConfigWatcher::watch(Arc::clone(&store)).unwrap();
        assert!(handle.is_active());
        assert!(handle.is_watching(&path));

        write_config(&path, r#"{"a": {"b": 2}}"#);
        assert!(wait_for(|| store.get_int("a.b") == Some(2)).await);
        assert!(store.reload_count() >= 1);

        handle.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_write_to_second_file_triggers_reload() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.yaml");
        let local = dir.path().join("local.yaml");
        write_config(&base, "db:\n  host: localhost\n  port: 5432\n");
        write_config(&local, "db:\n  port: 6000\n");
        let store = Arc::new(ConfigStore::load_yaml([&base, &local]).unwrap());

        let handle = ConfigWatcher::watch(Arc::clone(&store)).unwrap();
        assert!(handle.is_watching(&base));
        assert!(handle.is_watching(&local));
        assert!(!handle.is_watching(&dir.path().join("other.yaml")));
        assert_eq!(handle.watched_files().len(), 2);

        write_config(&local, "db:\n  port: 7000\n");
        assert!(wait_for(|| store.get_int("db.port") == Some(7000)).await);
        assert_eq!(store.get_string("db.host").as_deref(), Some("localhost"));

        handle.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_replaced_file_reports_detached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path, "v: 1\n");
        let store = Arc::new(ConfigStore::load_yaml([&path]).unwrap());
        let handle = ConfigWatcher::watch(Arc::clone(&store)).unwrap();
        let mut rx = handle.subscribe();

        let tmp = dir.path().join("config.yaml.tmp");
        write_config(&tmp, "v: 2\n");
        std::fs::rename(&tmp, &path).unwrap();
        loop {
            if let WatchEvent::Detached(detached) = next_event(&mut rx).await {
                assert!(detached.ends_with("config.yaml"));
                break;
            }
        }
        assert_eq!(store.get_int("v"), Some(1));
        assert!(handle.is_active());

        handle.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_broken_write_reports_failure_and_keeps_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path, "port: 8080\n");
        let store = Arc::new(ConfigStore::load_yaml([&path]).unwrap());
        let handle = ConfigWatcher::watch(Arc::clone(&store)).unwrap();
        let mut rx = handle.subscribe();

        // Append so the file never passes through a truncated, empty state.
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"port: [unterminated\n").unwrap();
        drop(f);
        loop {
            if let WatchEvent::ReloadFailed(msg) = next_event(&mut rx).await {
                assert!(msg.contains("config.yaml"));
                break;
            }
        }
        assert_eq!(store.get_int("port"), Some(8080));

        handle.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_ends_watching() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path, "port: 1\n");
        let store = Arc::new(ConfigStore::load_yaml([&path]).unwrap());
        let handle = ConfigWatcher::watch(Arc::clone(&store)).unwrap();
        let mut rx = handle.subscribe();

        handle.stop().await;
        loop {
            if next_event(&mut rx).await == WatchEvent::Stopped {
                break;
            }
        }

        write_config(&path, "port: 2\n");
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.get_int("port"), Some(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_cancels_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path, "port: 1\n");
        let store = Arc::new(ConfigStore::load_yaml([&path]).unwrap());
        let handle = ConfigWatcher::watch(Arc::clone(&store)).unwrap();
        let mut rx = handle.subscribe();

        drop(handle);
        loop {
            if next_event(&mut rx).await == WatchEvent::Stopped {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_missing_file_fails_setup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path, "port: 1\n");
        let store = Arc::new(ConfigStore::load_yaml([&path]).unwrap());
        std::fs::remove_file(&path).unwrap();

        let err = ConfigWatcher::watch(store).unwrap_err();
        assert!(matches!(err, ConfigError::WatchPath { .. }));
        assert!(err.is_watch_error());
    }
}
