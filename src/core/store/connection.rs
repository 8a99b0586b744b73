// src/core/store/connection.rs

//! The process-wide, reference-counted connection to the shared store.
//!
//! Every component that talks to the store (cache, bus transport, session store)
//! holds a reference to one `ConnectionManager`. The first `acquire` connects,
//! the last `release` closes, and the count is only ever touched under one lock.

use crate::core::MoonshipError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A live connection that can be torn down exactly once by its manager.
#[async_trait]
pub trait StoreConnection: Send + Sync + 'static {
    async fn close(&self) -> Result<(), MoonshipError>;
}

/// Establishes new connections from already-validated configuration.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: StoreConnection;

    async fn connect(&self) -> Result<Self::Connection, MoonshipError>;
}

struct SharedState<T> {
    handle: Option<Arc<T>>,
    ref_count: usize,
}

/// Owns the single shared connection handle and its reference count.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    state: Mutex<SharedState<C::Connection>>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            state: Mutex::new(SharedState {
                handle: None,
                ref_count: 0,
            }),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Returns the shared handle, connecting first if no one holds it.
    pub async fn acquire(&self) -> Result<Arc<C::Connection>, MoonshipError> {
        let mut state = self.state.lock().await;
        let handle = match &state.handle {
            Some(handle) => handle.clone(),
            None => {
                // The lock is held across the connect so concurrent first
                // acquirers share a single connection.
                let handle = Arc::new(self.connector.connect().await?);
                info!("Connected to the shared store.");
                state.handle = Some(handle.clone());
                handle
            }
        };
        state.ref_count += 1;
        debug!("Shared store connection acquired (refs={}).", state.ref_count);
        Ok(handle)
    }

    /// Drops one reference; the last one closes the connection.
    pub async fn release(&self) -> Result<(), MoonshipError> {
        let mut state = self.state.lock().await;
        if state.ref_count == 0 {
            return Err(MoonshipError::InvalidState(
                "release called without a matching acquire".to_string(),
            ));
        }
        state.ref_count -= 1;
        debug!("Shared store connection released (refs={}).", state.ref_count);
        if state.ref_count > 0 {
            return Ok(());
        }

        // Close before clearing the handle, still under the lock, so a racing
        // `acquire` waits for the teardown and then opens a fresh connection.
        let result = match &state.handle {
            Some(handle) => handle.close().await,
            None => Ok(()),
        };
        state.handle = None;
        match &result {
            Ok(()) => info!("Closed the shared store connection."),
            Err(e) => warn!("Error while closing the shared store connection: {}", e),
        }
        result
    }

    /// Runs `f` with an acquired handle and releases it on every exit path.
    pub async fn with_connection<F, Fut, R>(&self, f: F) -> Result<R, MoonshipError>
    where
        F: FnOnce(Arc<C::Connection>) -> Fut,
        Fut: Future<Output = Result<R, MoonshipError>>,
    {
        let handle = self.acquire().await?;
        let result = f(handle).await;
        let released = self.release().await;
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), _) => Err(e),
        }
    }

    pub async fn ref_count(&self) -> usize {
        self.state.lock().await.ref_count
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.handle.is_some()
    }
}

/// A component's claim on the shared connection.
///
/// `open` acquires at most once and `close` releases at most once, however often
/// they are called, so a component can never release someone else's reference.
pub struct ConnectionLease<C: Connector> {
    manager: Arc<ConnectionManager<C>>,
    handle: Mutex<Option<Arc<C::Connection>>>,
}

impl<C: Connector> ConnectionLease<C> {
    pub fn new(manager: Arc<ConnectionManager<C>>) -> Self {
        Self {
            manager,
            handle: Mutex::new(None),
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager<C>> {
        &self.manager
    }

    pub async fn open(&self) -> Result<Arc<C::Connection>, MoonshipError> {
        let mut handle = self.handle.lock().await;
        if let Some(existing) = handle.as_ref() {
            return Ok(existing.clone());
        }
        let acquired = self.manager.acquire().await?;
        *handle = Some(acquired.clone());
        Ok(acquired)
    }

    pub async fn close(&self) -> Result<(), MoonshipError> {
        let mut handle = self.handle.lock().await;
        if handle.take().is_some() {
            self.manager.release().await?;
        }
        Ok(())
    }

    /// Returns the held handle, or `NotOpen` if `open` has not been called.
    pub async fn get(&self) -> Result<Arc<C::Connection>, MoonshipError> {
        self.handle.lock().await.clone().ok_or(MoonshipError::NotOpen)
    }

    pub async fn is_open(&self) -> bool {
        self.handle.lock().await.is_some()
    }
}
