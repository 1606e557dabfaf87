//! Background re-listing of folders whose files are still being processed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::PickerError;
use crate::path_set;
use crate::session::{NodeView, PickerSession};

#[derive(Debug, Clone, PartialEq)]
pub enum FolderUpdate {
    Loaded { folder: String, views: Vec<NodeView> },
    /// The listing failed; polling continues.
    Failed { folder: String, error: PickerError },
    /// Nothing left in flight; the poller has exited.
    Settled { folder: String },
}

struct FolderPoller {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

async fn poll_folder(
    session: Arc<PickerSession>,
    folder: String,
    period: Duration,
    updates: mpsc::UnboundedSender<FolderUpdate>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.changed() => {
                debug!("stopped polling {}", folder);
                return;
            }
            _ = ticker.tick() => {}
        }

        match session.refresh_folder(&folder).await {
            Ok(views) => {
                let keep_polling = session.should_poll(&views);
                let sent = updates.send(FolderUpdate::Loaded {
                    folder: folder.clone(),
                    views,
                });
                if sent.is_err() {
                    return;
                }
                if !keep_polling {
                    debug!("{} settled", folder);
                    let _ = updates.send(FolderUpdate::Settled { folder });
                    return;
                }
            }
            Err(error) => {
                warn!("polling {} failed: {}", folder, error);
                let failed = FolderUpdate::Failed {
                    folder: folder.clone(),
                    error,
                };
                if updates.send(failed).is_err() {
                    return;
                }
            }
        }
    }
}

/// One poller per watched folder. Collapsing a folder stops its poller and
/// those of its descendants; rebuilds and deletes are never cancelled.
pub struct PollerSet {
    session: Arc<PickerSession>,
    period: Duration,
    updates: mpsc::UnboundedSender<FolderUpdate>,
    pollers: Mutex<HashMap<String, FolderPoller>>,
}

impl PollerSet {
    pub fn new(session: Arc<PickerSession>) -> (Self, mpsc::UnboundedReceiver<FolderUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let period = session.config().poll_interval();
        let set = Self {
            session,
            period,
            updates: tx,
            pollers: Mutex::new(HashMap::new()),
        };
        (set, rx)
    }

    /// Start polling `folder` unless a live poller already covers it.
    pub fn watch(&self, folder: &str) -> bool {
        let folder = path_set::normalize(folder);
        let mut pollers = self.pollers.lock();
        if let Some(existing) = pollers.get(&folder) {
            if !existing.handle.is_finished() {
                return false;
            }
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(poll_folder(
            Arc::clone(&self.session),
            folder.clone(),
            self.period,
            self.updates.clone(),
            stop_rx,
        ));
        debug!("polling {} every {:?}", folder, self.period);
        pollers.insert(
            folder,
            FolderPoller {
                stop: stop_tx,
                handle,
            },
        );
        true
    }

    /// Stop polling `folder` and everything below it.
    pub fn unwatch(&self, folder: &str) -> usize {
        let folder = path_set::normalize(folder);
        let mut pollers = self.pollers.lock();
        let doomed: Vec<String> = pollers
            .keys()
            .filter(|k| **k == folder || path_set::is_ancestor(&folder, k))
            .cloned()
            .collect();
        for key in &doomed {
            if let Some(poller) = pollers.remove(key) {
                let _ = poller.stop.send(true);
            }
        }
        doomed.len()
    }

    pub fn unwatch_all(&self) {
        for (_, poller) in self.pollers.lock().drain() {
            let _ = poller.stop.send(true);
        }
    }

    /// Folders with a poller still running.
    pub fn active(&self) -> Vec<String> {
        let mut active: Vec<String> = self
            .pollers
            .lock()
            .iter()
            .filter(|(_, p)| !p.handle.is_finished())
            .map(|(k, _)| k.clone())
            .collect();
        active.sort();
        active
    }
}

impl Drop for PollerSet {
    fn drop(&mut self) {
        self.unwatch_all();
    }
}
