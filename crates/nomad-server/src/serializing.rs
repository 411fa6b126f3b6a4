//! One-at-a-time access to a [`NomadServer`].

use nomad_storage::StateStore;
use parking_lot::FairMutex;

use crate::{
    error::Result,
    message::{
        AcceptRejectResponse, CommitMessage, DiscoverResponse, NomadRequest, NomadResponse,
        PrepareMessage, RollbackMessage, TakeoverMessage,
    },
    server::NomadServer,
};

/// Serializes every operation on a node behind a fair lock.
///
/// Callers are served in arrival order. A caller that needs several
/// operations to run without interleaving (a history sync, a repair) uses
/// [`SerializingNomadServer::with_exclusive`] and calls the inner server
/// directly; the inner calls then run under the same lock acquisition, so no
/// re-entrant locking is needed.
#[derive(Debug)]
pub struct SerializingNomadServer<S> {
    inner: FairMutex<NomadServer<S>>,
}

impl<S: StateStore> SerializingNomadServer<S> {
    pub fn new(server: NomadServer<S>) -> Self {
        Self {
            inner: FairMutex::new(server),
        }
    }

    pub fn discover(&self) -> DiscoverResponse {
        self.inner.lock().discover()
    }

    pub fn prepare(&self, msg: PrepareMessage) -> Result<AcceptRejectResponse> {
        self.inner.lock().prepare(msg)
    }

    pub fn commit(&self, msg: CommitMessage) -> Result<AcceptRejectResponse> {
        self.inner.lock().commit(msg)
    }

    pub fn rollback(&self, msg: RollbackMessage) -> Result<AcceptRejectResponse> {
        self.inner.lock().rollback(msg)
    }

    pub fn takeover(&self, msg: TakeoverMessage) -> Result<AcceptRejectResponse> {
        self.inner.lock().takeover(msg)
    }

    pub fn handle(&self, request: NomadRequest) -> Result<NomadResponse> {
        self.inner.lock().handle(request)
    }

    /// Runs `f` with exclusive access to the server.
    pub fn with_exclusive<R>(&self, f: impl FnOnce(&mut NomadServer<S>) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    pub fn into_inner(self) -> NomadServer<S> {
        self.inner.into_inner()
    }
}
