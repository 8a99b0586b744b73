// src/core/store/mod.rs

//! Access to the shared store: connection lifecycle, the RESP client, and the
//! in-process store used by the `memory` backend.

pub mod client;
pub mod connection;
pub mod memory;
pub mod stream;

pub use client::{Endpoint, RespClient, RespConnector};
pub use connection::{ConnectionLease, ConnectionManager, Connector, StoreConnection};
pub use memory::{MemoryConnection, MemoryConnector, MemoryStore};

/// Connection manager for the Redis backend.
pub type RedisConnectionManager = ConnectionManager<RespConnector>;

/// Connection manager for the in-process backend.
pub type MemoryConnectionManager = ConnectionManager<MemoryConnector>;
