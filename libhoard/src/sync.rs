use crate::storage::Storage;
use crossbeam_channel::RecvTimeoutError;
use std::thread::JoinHandle;
use std::time::Duration;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// a commit landed; push as soon as possible
    MustSync,
    Shutdown,
}

/// the background task of a storage: coalesces commit events and a periodic
/// timer into push/fetch/merge passes
pub struct Syncer {
    storage: Storage,
    handle: Option<JoinHandle<()>>,
}

impl Syncer {
    pub(crate) fn spawn(storage: Storage, interval: Duration) -> Self {
        let events = storage.sync_events();
        let worker = storage.clone();
        let handle = std::thread::Builder::new()
            .name("hoard-syncer".to_owned())
            .spawn(move || loop {
                match events.recv_timeout(interval) {
                    Ok(SyncEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    Ok(SyncEvent::MustSync) => {
                        // coalesce a burst of commits into a single push
                        let mut shutdown = false;
                        while let Ok(event) = events.try_recv() {
                            if event == SyncEvent::Shutdown {
                                shutdown = true;
                                break;
                            }
                        }
                        debug!("syncer :: push");
                        if let Err(err) = worker.push() {
                            warn!("syncer push failed: {}", err);
                        }
                        if shutdown {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        debug!("syncer :: periodic fetch");
                        if let Err(err) = worker.fetch() {
                            warn!("syncer fetch failed: {}", err);
                        }
                        for open_box in worker.open_boxes() {
                            if let Err(err) = open_box.update_from_remotes() {
                                warn!(
                                    "syncer update of box `{}` failed: {}",
                                    open_box.name(),
                                    err
                                );
                            }
                        }
                    }
                }
            })
            .unwrap_or_else(|err| panic!("failed to spawn syncer thread: {}", err));
        Self { storage, handle: Some(handle) }
    }

    /// stop the background task and wait for it to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.storage.sync_sender().send(SyncEvent::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Syncer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
