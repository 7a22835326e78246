//! Asynchronous operations run on behalf of component states.
//!
//! Each operation runs as its own task. Progress and telemetry flow back to
//! the owning state over a channel and are applied to the component on the
//! component's task, so the component is only ever mutated from one place.

pub mod action;
pub mod download;
pub mod install;
pub mod puff;

use std::future::Future;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::warn;

use crate::telemetry::EventDict;

/// A message emitted by a running operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationMessage {
    /// Download progress; -1 means unknown
    DownloadProgress { downloaded_bytes: i64, total_bytes: i64 },
    /// Install progress in percent
    InstallProgress(i32),
    /// A telemetry event to append to the component
    Event(EventDict),
}

/// A payload file ready for the next step of the cycle.
///
/// Payloads produced by an operation own the scratch directory they were
/// written to, and dropping the payload removes it. Payloads served from
/// the cache own nothing.
#[derive(Debug)]
pub struct Payload {
    path: PathBuf,
    scratch: Option<TempDir>,
}

impl Payload {
    /// A payload living in its own scratch directory.
    pub fn in_scratch(path: PathBuf, scratch: TempDir) -> Self {
        Self {
            path,
            scratch: Some(scratch),
        }
    }

    /// A payload owned by someone else, such as the cache.
    pub fn borrowed(path: PathBuf) -> Self {
        Self {
            path,
            scratch: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            let dir = scratch.path().to_path_buf();
            if let Err(e) = scratch.close() {
                warn!(dir = %dir.display(), error = %e, "Failed to remove payload directory");
            }
        }
    }
}

/// Sending side handed to an operation.
#[derive(Debug, Clone)]
pub struct OperationSink {
    tx: mpsc::UnboundedSender<OperationMessage>,
}

impl OperationSink {
    /// A sink whose messages go nowhere.
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    pub fn event(&self, event: EventDict) {
        let _ = self.tx.send(OperationMessage::Event(event));
    }

    pub fn download_progress(&self, downloaded_bytes: i64, total_bytes: i64) {
        let _ = self.tx.send(OperationMessage::DownloadProgress {
            downloaded_bytes,
            total_bytes,
        });
    }

    pub fn install_progress(&self, percent: i32) {
        let _ = self.tx.send(OperationMessage::InstallProgress(percent));
    }
}

/// Cancels an in-flight operation.
#[derive(Debug, Clone)]
pub struct CancelHandle(AbortHandle);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.abort();
    }
}

/// The operation was aborted before it produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

/// A spawned operation. Dropping it aborts the task.
pub struct Operation<T> {
    handle: JoinHandle<T>,
    messages: mpsc::UnboundedReceiver<OperationMessage>,
}

impl<T: Send + 'static> Operation<T> {
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(OperationSink) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (tx, messages) = mpsc::unbounded_channel();
        let handle = tokio::spawn(f(OperationSink { tx }));
        Self { handle, messages }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.handle.abort_handle())
    }

    /// Apply every message in order, then return the operation's result.
    ///
    /// The channel closes when the task drops its sink, so all messages are
    /// delivered before the result is.
    pub async fn drive<F>(mut self, mut on_message: F) -> Result<T, Aborted>
    where
        F: FnMut(OperationMessage),
    {
        while let Some(message) = self.messages.recv().await {
            on_message(message);
        }
        (&mut self.handle).await.map_err(|_| Aborted)
    }
}

impl<T> Drop for Operation<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
