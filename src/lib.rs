// src/lib.rs

pub mod config;
pub mod core;

// Re-export
pub use crate::core::bus::{Message, MessageBus, MessageHandler};
pub use crate::core::cache::SharedCache;
pub use crate::core::session::{Session, SessionStore};
pub use crate::core::{MoonshipError, StoreBackend};
