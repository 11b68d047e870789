//! One single-writer task per repository owning its configuration tree.

mod keeper;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::tree::{Action, TreeOperation, TreeView};

pub use keeper::{KeeperSettings, spawn};

/// What a tree-keeper can be asked to do.
#[derive(Debug)]
pub enum KeeperRequest {
    Mutate(TreeOperation),
    /// Read-only view of the subtree below an object, or of the whole tree.
    Show(Option<Uuid>),
    Rebuild,
    Repair,
    Freeze(bool),
    Stop,
}

impl KeeperRequest {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            KeeperRequest::Mutate(op) => op.name(),
            KeeperRequest::Show(_) => "show_tree",
            KeeperRequest::Rebuild => "rebuild",
            KeeperRequest::Repair => "repair",
            KeeperRequest::Freeze(true) => "freeze",
            KeeperRequest::Freeze(false) => "unfreeze",
            KeeperRequest::Stop => "stop",
        }
    }

    /// Requests that change persisted state and therefore run as jobs.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            KeeperRequest::Mutate(_) | KeeperRequest::Rebuild | KeeperRequest::Repair
        )
    }
}

#[derive(Debug)]
pub enum KeeperReply {
    Applied(Vec<Action>),
    Tree(TreeView),
    Done,
}

pub(crate) struct Envelope {
    pub job: Option<Uuid>,
    pub request: KeeperRequest,
    pub reply: oneshot::Sender<Result<KeeperReply>>,
}

/// Lifecycle flags of a keeper, readable without going through its queue.
#[derive(Debug, Default)]
pub struct KeeperStatus {
    ready: AtomicBool,
    broken: AtomicBool,
    frozen: AtomicBool,
    stopped: AtomicBool,
    rebuilding: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeeperState {
    pub ready: bool,
    pub broken: bool,
    pub frozen: bool,
    pub stopped: bool,
    pub rebuilding: bool,
}

impl KeeperStatus {
    #[must_use]
    pub fn state(&self) -> KeeperState {
        KeeperState {
            ready: self.ready.load(Ordering::Acquire),
            broken: self.broken.load(Ordering::Acquire),
            frozen: self.frozen.load(Ordering::Acquire),
            stopped: self.stopped.load(Ordering::Acquire),
            rebuilding: self.rebuilding.load(Ordering::Acquire),
        }
    }

    pub(crate) fn set_ready(&self, value: bool) {
        self.ready.store(value, Ordering::Release);
    }

    pub(crate) fn set_broken(&self, value: bool) {
        self.broken.store(value, Ordering::Release);
    }

    pub(crate) fn set_frozen(&self, value: bool) {
        self.frozen.store(value, Ordering::Release);
    }

    pub(crate) fn set_stopped(&self, value: bool) {
        self.stopped.store(value, Ordering::Release);
    }

    pub(crate) fn set_rebuilding(&self, value: bool) {
        self.rebuilding.store(value, Ordering::Release);
    }
}

impl KeeperState {
    /// Refusal for a request that would change the tree, if any.
    pub fn refuse(&self, request: &KeeperRequest) -> Result<()> {
        if self.stopped {
            return Err(Error::Shutdown);
        }
        match request {
            KeeperRequest::Mutate(_) => {
                if !self.ready || self.rebuilding {
                    return Err(Error::Overload("repository is loading".into()));
                }
                if self.broken {
                    return Err(Error::conflict("repository is broken and needs repair"));
                }
                if self.frozen {
                    return Err(Error::conflict("repository is frozen"));
                }
                Ok(())
            }
            KeeperRequest::Rebuild if self.broken => {
                Err(Error::conflict("repository is broken and needs repair"))
            }
            KeeperRequest::Show(_) if !self.ready => {
                Err(Error::Overload("repository is loading".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Sender side of a running keeper.
#[derive(Clone)]
pub struct KeeperHandle {
    pub repository_id: Uuid,
    pub name: String,
    tx: mpsc::Sender<Envelope>,
    status: Arc<KeeperStatus>,
}

impl KeeperHandle {
    #[must_use]
    pub fn state(&self) -> KeeperState {
        self.status.state()
    }

    /// Enqueues a request without waiting for queue space.
    pub fn try_submit(
        &self,
        job: Option<Uuid>,
        request: KeeperRequest,
    ) -> Result<oneshot::Receiver<Result<KeeperReply>>> {
        self.state().refuse(&request)?;
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(Envelope {
                job,
                request,
                reply,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    Error::Overload(format!("repository {} queue is full", self.name))
                }
                mpsc::error::TrySendError::Closed(_) => Error::Shutdown,
            })?;
        Ok(rx)
    }

    /// Submits and awaits the reply.
    pub async fn request(&self, job: Option<Uuid>, request: KeeperRequest) -> Result<KeeperReply> {
        let rx = self.try_submit(job, request)?;
        rx.await.map_err(|_| Error::Shutdown)?
    }

    /// Asks the keeper to drain and exit, waiting for its acknowledgement.
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                job: None,
                request: KeeperRequest::Stop,
                reply,
            })
            .await
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)?.map(|_| ())
    }
}
