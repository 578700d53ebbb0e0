//! Readiness gates for pre-bundled files.
//!
//! Every dependency handed out before its bundle exists carries a
//! [`Processing`] receiver. The run that writes the bundle holds the
//! matching [`ProcessingHandle`] and settles it on commit or failure.
//! Dropping a handle without settling it cancels the gate.

use std::fmt;
use tokio::sync::watch;

use crate::error::{OptimizeError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingState {
    Pending,
    Ready,
    Failed(String),
}

/// Completion side of a processing gate.
#[derive(Debug)]
pub struct ProcessingHandle {
    tx: watch::Sender<ProcessingState>,
}

/// Awaitable side of a processing gate. Cheap to clone.
#[derive(Clone)]
pub struct Processing {
    rx: watch::Receiver<ProcessingState>,
}

impl fmt::Debug for Processing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Processing").field(&*self.rx.borrow()).finish()
    }
}

/// A new pending gate.
pub fn processing() -> (ProcessingHandle, Processing) {
    let (tx, rx) = watch::channel(ProcessingState::Pending);
    (ProcessingHandle { tx }, Processing { rx })
}

impl ProcessingHandle {
    pub fn resolve(self) {
        self.tx.send_replace(ProcessingState::Ready);
    }

    pub fn reject(self, message: impl Into<String>) {
        self.tx.send_replace(ProcessingState::Failed(message.into()));
    }

    pub fn subscribe(&self) -> Processing {
        Processing {
            rx: self.tx.subscribe(),
        }
    }
}

impl Processing {
    /// A gate that is already open, for deps loaded from cached metadata.
    pub fn ready() -> Self {
        let (tx, rx) = watch::channel(ProcessingState::Ready);
        drop(tx);
        Self { rx }
    }

    pub fn state(&self) -> ProcessingState {
        self.rx.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.rx.borrow(), ProcessingState::Pending)
    }

    /// Wait until the bundle is on disk.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.rx.clone();
        let outcome = rx
            .wait_for(|state| !matches!(state, ProcessingState::Pending))
            .await
            .map(|state| state.clone());
        match outcome {
            Ok(ProcessingState::Ready) => Ok(()),
            Ok(ProcessingState::Failed(message)) => Err(OptimizeError::Processing(message)),
            Ok(ProcessingState::Pending) | Err(_) => Err(OptimizeError::Processing(
                "optimization run was cancelled".to_string(),
            )),
        }
    }
}

/// The gate shared by every dependency waiting on the next run, plus gates
/// carried over from runs that were discarded.
#[derive(Debug, Default)]
pub(crate) struct ProcessingQueue {
    next: Option<ProcessingHandle>,
    carried: Vec<ProcessingHandle>,
}

impl ProcessingQueue {
    /// The gate for the next run, created on first use.
    pub(crate) fn next(&mut self) -> Processing {
        match &self.next {
            Some(handle) => handle.subscribe(),
            None => {
                let (handle, processing) = processing();
                self.next = Some(handle);
                processing
            }
        }
    }

    /// Every unsettled gate, for the run that is starting.
    pub(crate) fn take(&mut self) -> Vec<ProcessingHandle> {
        let mut handles = std::mem::take(&mut self.carried);
        handles.extend(self.next.take());
        handles
    }

    /// Gates of a discarded run wait for the next one.
    pub(crate) fn carry(&mut self, handles: Vec<ProcessingHandle>) {
        self.carried.extend(handles);
    }
}

pub(crate) fn resolve_all(handles: Vec<ProcessingHandle>) {
    for handle in handles {
        handle.resolve();
    }
}

pub(crate) fn reject_all(handles: Vec<ProcessingHandle>, message: &str) {
    for handle in handles {
        handle.reject(message);
    }
}
