//! Lazy, single-flight collection initialization.
//!
//! Every collection handle shares a [`Lifecycle`] that makes sure the backing collection
//! exists before the first operation runs. The first caller starts the attempt; callers
//! arriving while it is in flight await the same shared future; once it succeeds the
//! handle stays ready until dropped.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::{
    error::{WebDbError, WebDbResult},
    transport::Transport,
};

type Attempt = Shared<BoxFuture<'static, WebDbResult<()>>>;

#[derive(Clone)]
enum State {
    Uninitialized,
    Initializing(Attempt),
    Ready,
}

struct Inner {
    state: State,
    /// Bumped by every reset so late attempts cannot resurrect a dropped handle.
    epoch: u64,
}

/// Readiness state of one named collection.
pub struct Lifecycle {
    name: String,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("name", &self.name)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl Lifecycle {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Lifecycle {
            name: name.into(),
            inner: Mutex::new(Inner { state: State::Uninitialized, epoch: 0 }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.inner.lock().state, State::Ready)
    }

    /// Ensures the backing collection exists.
    ///
    /// Checks for the collection, then creates it when absent. A concurrent creator winning the race
    /// ([`WebDbError::CollectionAlreadyExists`]) counts as success. A failure is handed
    /// to every waiter and leaves the handle uninitialized so the next call retries.
    ///
    /// # Errors
    ///
    /// Returns the transport error of the failed attempt.
    pub async fn ensure_ready<T>(&self, transport: Arc<T>) -> WebDbResult<()>
    where
        T: Transport + 'static,
    {
        let (attempt, epoch) = {
            let mut inner = self.inner.lock();
            match inner.state.clone() {
                State::Ready => return Ok(()),
                State::Initializing(attempt) => (attempt, inner.epoch),
                State::Uninitialized => {
                    let attempt = initialize(transport, self.name.clone()).boxed().shared();
                    inner.state = State::Initializing(attempt.clone());
                    (attempt, inner.epoch)
                }
            }
        };

        let result = attempt.clone().await;

        // Only the attempt that is still current may settle the state.
        let mut inner = self.inner.lock();
        let current = matches!(&inner.state, State::Initializing(running) if running.ptr_eq(&attempt));
        if inner.epoch == epoch && current {
            inner.state = match &result {
                Ok(()) => State::Ready,
                Err(_) => State::Uninitialized,
            };
        }

        result
    }

    /// Forgets readiness. The next operation runs a fresh initialization attempt.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        inner.state = State::Uninitialized;
    }

    /// Destroys the backing collection and resets the handle.
    ///
    /// A collection that does not exist counts as dropped.
    ///
    /// # Errors
    ///
    /// Returns any other transport error; the handle is reset either way.
    pub async fn drop_collection<T>(&self, transport: &T) -> WebDbResult<()>
    where
        T: Transport + ?Sized,
    {
        let result = transport.destroy_collection(&self.name).await;
        self.reset();

        match result {
            Ok(()) => {
                tracing::info!(collection = %self.name, "dropped collection");
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                tracing::info!(collection = %self.name, "drop of absent collection");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

async fn initialize<T>(transport: Arc<T>, name: String) -> WebDbResult<()>
where
    T: Transport + 'static,
{
    tracing::debug!(collection = %name, "checking collection");
    if transport.collection_exists(&name).await? {
        return Ok(());
    }

    tracing::debug!(collection = %name, "creating collection");
    match transport.create_collection(&name).await {
        Ok(()) => Ok(()),
        Err(WebDbError::CollectionAlreadyExists(_)) => Ok(()),
        Err(err) => {
            tracing::warn!(collection = %name, error = %err, "collection initialization failed");
            Err(err)
        }
    }
}
