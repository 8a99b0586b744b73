// src/core/protocol/mod.rs

//! The RESP wire protocol spoken with the shared store.

pub mod resp_frame;
pub use resp_frame::{RespFrame, RespFrameCodec};
