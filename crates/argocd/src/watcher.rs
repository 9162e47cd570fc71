//! Reconnecting per-namespace watch streams feeding a bounded worker pool.
//!
//! Each namespace runs its own list-then-watch loop. Server-side watches are
//! bounded to five minutes so staleness self-heals; any stream termination
//! re-lists and re-watches after a short sleep. Events funnel into one
//! bounded channel; when it is full the event is dropped with a warning,
//! because a later modification of the same object resurfaces its state.

use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use kube::api::{ListParams, WatchParams};
use kube::core::WatchEvent;
use kube::Api;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::processor::{EventHandler, EventType};
use crate::resource::Application;

/// Capacity of the shared event channel.
const EVENT_CHANNEL_CAPACITY: usize = 100_000;

/// Server-side watch timeout; the watch is re-established transparently.
const WATCH_TIMEOUT_SECS: u32 = 300;

/// Sleep after a failed list or watch setup.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Sleep after a watch stream ends normally.
const REWATCH_BACKOFF: Duration = Duration::from_secs(1);

/// Fatal setup errors. Everything after startup is recoverable and retried.
#[derive(Debug, Error)]
pub enum WatchError {
    /// No namespaces configured to watch
    #[error("no namespaces configured for watching")]
    NoNamespaces,
}

type Event = (EventType, Application);

/// Watches applications in the configured namespaces and drains events
/// through a worker pool into the event handler.
pub struct Watcher {
    client: kube::Client,
    config: Arc<MonitorConfig>,
    handler: Arc<dyn EventHandler>,
}

/// Running watcher; dropping it without [`WatcherHandle::stop`] detaches the
/// background tasks.
pub struct WatcherHandle {
    shutdown: watch::Sender<bool>,
    watch_tasks: Vec<JoinHandle<()>>,
    worker_tasks: Vec<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Signal shutdown and wait for watches and workers to drain.
    /// Idempotent: a second call finds nothing left to join.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        for task in self.watch_tasks.drain(..) {
            let _ = task.await;
        }
        // Watch loops dropped their senders; workers drain the channel and
        // exit once it closes.
        for task in self.worker_tasks.drain(..) {
            let _ = task.await;
        }
        info!("Application watcher stopped");
    }
}

impl Watcher {
    #[must_use]
    pub fn new(
        client: kube::Client,
        config: Arc<MonitorConfig>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            client,
            config,
            handler,
        }
    }

    /// Spawn the worker pool and one watch loop per namespace. Returns
    /// immediately; fatal setup problems are reported synchronously.
    pub fn start(&self) -> Result<WatcherHandle, WatchError> {
        if self.config.namespaces.is_empty() {
            return Err(WatchError::NoNamespaces);
        }

        info!(
            namespaces = ?self.config.namespaces,
            workers = self.config.workers,
            "Starting application watcher"
        );

        let (tx, rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));
        let (shutdown, _) = watch::channel(false);

        let worker_tasks = (0..self.config.workers.max(1))
            .map(|id| {
                let rx = rx.clone();
                let handler = self.handler.clone();
                tokio::spawn(event_worker(id, rx, handler))
            })
            .collect();

        let watch_tasks = self
            .config
            .namespaces
            .iter()
            .map(|namespace| {
                let client = self.client.clone();
                let namespace = namespace.clone();
                let tx = tx.clone();
                let shutdown_rx = shutdown.subscribe();
                tokio::spawn(watch_namespace(client, namespace, tx, shutdown_rx))
            })
            .collect();

        Ok(WatcherHandle {
            shutdown,
            watch_tasks,
            worker_tasks,
        })
    }
}

/// Pull events until the channel closes. The handler runs in its own task so
/// a panicking handler kills that task, not the worker.
async fn event_worker(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Event>>>,
    handler: Arc<dyn EventHandler>,
) {
    loop {
        let event = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some((event_type, app)) = event else {
            debug!(worker = id, "Event channel closed, worker exiting");
            return;
        };

        let handler = handler.clone();
        let task = tokio::spawn(async move {
            handler.handle_event(event_type, app).await;
        });
        if let Err(join_err) = task.await {
            if join_err.is_panic() {
                error!(worker = id, "Event handler panicked, worker continues");
            }
        }
    }
}

/// One namespace's list-then-watch loop: disconnected -> listing -> watching,
/// back to disconnected on any error.
async fn watch_namespace(
    client: kube::Client,
    namespace: String,
    tx: mpsc::Sender<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(namespace = %namespace, "Starting application watch");
    let api: Api<Application> = Api::namespaced(client, &namespace);

    loop {
        if *shutdown.borrow() {
            break;
        }

        // List first: verifies access and yields the resource version to
        // watch from.
        let list_params = ListParams::default();
        let list = tokio::select! {
            list = api.list(&list_params) => list,
            _ = shutdown.changed() => break,
        };
        let resource_version = match list {
            Ok(list) => {
                info!(
                    namespace = %namespace,
                    count = list.items.len(),
                    "Listed applications"
                );
                list.metadata.resource_version.unwrap_or_default()
            }
            Err(err) => {
                error!(namespace = %namespace, error = %err, "Failed to list applications");
                if sleep_or_shutdown(RECONNECT_BACKOFF, &mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        let stream = match api.watch(&params, &resource_version).await {
            Ok(stream) => stream,
            Err(err) => {
                error!(namespace = %namespace, error = %err, "Failed to create watch");
                if sleep_or_shutdown(RECONNECT_BACKOFF, &mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        debug!(namespace = %namespace, "Watch established");
        drain_watch(stream, &namespace, &tx, &mut shutdown).await;

        if *shutdown.borrow() {
            break;
        }
        warn!(namespace = %namespace, "Watch ended, re-establishing");
        if sleep_or_shutdown(REWATCH_BACKOFF, &mut shutdown).await {
            break;
        }
    }

    info!(namespace = %namespace, "Application watch stopped");
}

/// Forward watch events into the shared channel until the stream ends.
async fn drain_watch(
    stream: impl futures::Stream<Item = Result<WatchEvent<Application>, kube::Error>>,
    namespace: &str,
    tx: &mpsc::Sender<Event>,
    shutdown: &mut watch::Receiver<bool>,
) {
    futures::pin_mut!(stream);
    let mut event_count = 0usize;

    loop {
        let next = tokio::select! {
            next = stream.try_next() => next,
            _ = shutdown.changed() => return,
        };

        let event = match next {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(
                    namespace = %namespace,
                    events = event_count,
                    "Watch stream closed"
                );
                return;
            }
            Err(err) => {
                warn!(namespace = %namespace, error = %err, "Watch stream error");
                return;
            }
        };
        event_count += 1;

        let typed = match event {
            WatchEvent::Added(app) => (EventType::Added, app),
            WatchEvent::Modified(app) => (EventType::Modified, app),
            WatchEvent::Deleted(app) => (EventType::Deleted, app),
            WatchEvent::Bookmark(_) => continue,
            WatchEvent::Error(status) => {
                // Stale resource version or server-side trouble; re-list.
                warn!(namespace = %namespace, status = %status.message, "Watch error event");
                return;
            }
        };

        match tx.try_send(typed) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(namespace = %namespace, "Event channel is full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return,
        }
    }
}

/// Sleep for `duration`, returning true when shutdown fired first.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        () = tokio::time::sleep(duration) => false,
        _ = shutdown.changed() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ApplicationSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        seen: AtomicUsize,
        panic_on_first: bool,
    }

    #[async_trait::async_trait]
    impl EventHandler for CountingHandler {
        async fn handle_event(&self, _event: EventType, _app: Application) {
            let n = self.seen.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_first && n == 0 {
                panic!("scripted handler panic");
            }
        }
    }

    fn app(name: &str) -> Application {
        Application::new(name, ApplicationSpec::default())
    }

    #[tokio::test]
    async fn workers_drain_events_and_exit_on_close() {
        let (tx, rx) = mpsc::channel::<Event>(16);
        let rx = Arc::new(Mutex::new(rx));
        let handler = Arc::new(CountingHandler {
            seen: AtomicUsize::new(0),
            panic_on_first: false,
        });

        let workers: Vec<_> = (0..4)
            .map(|id| tokio::spawn(event_worker(id, rx.clone(), handler.clone())))
            .collect();

        for i in 0..20 {
            tx.send((EventType::Modified, app(&format!("app-{i}"))))
                .await
                .unwrap();
        }
        drop(tx);

        for worker in workers {
            worker.await.unwrap();
        }
        assert_eq!(handler.seen.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn worker_survives_handler_panic() {
        let (tx, rx) = mpsc::channel::<Event>(16);
        let rx = Arc::new(Mutex::new(rx));
        let handler = Arc::new(CountingHandler {
            seen: AtomicUsize::new(0),
            panic_on_first: true,
        });

        let worker = tokio::spawn(event_worker(0, rx, handler.clone()));

        tx.send((EventType::Modified, app("panics"))).await.unwrap();
        tx.send((EventType::Modified, app("survives"))).await.unwrap();
        drop(tx);

        worker.await.unwrap();
        assert_eq!(handler.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (tx, _rx) = mpsc::channel::<Event>(1);
        tx.try_send((EventType::Modified, app("first"))).unwrap();
        // Second send finds the channel full; the watcher drops and logs.
        assert!(matches!(
            tx.try_send((EventType::Modified, app("second"))),
            Err(mpsc::error::TrySendError::Full(_))
        ));
    }
}
