// src/core/mod.rs

//! The coordination layer: shared store access, cache, message bus, sessions,
//! and the strategy registry and engine commands built on them.

pub mod backend;
pub mod bus;
pub mod cache;
pub mod errors;
pub mod ipc;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod store;

pub use backend::StoreBackend;
pub use errors::MoonshipError;
