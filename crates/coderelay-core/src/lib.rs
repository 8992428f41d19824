//! Core types for the code relay.
//!
//! This crate provides the fundamental building blocks:
//! - `InboundMessage` / `OutboundMessage` - the JSON wire protocol
//! - `RequestKind` / `ResponseKind` - protocol tags
//! - `OutputStream` - names of the two relayed process streams
//! - `OutboundTx` - the channel every background task reports through
//! - `join_confined` - keeps client-supplied paths inside a base directory

pub mod paths;
pub mod protocol;

pub use paths::join_confined;
pub use protocol::{
    InboundMessage, OutboundMessage, OutboundTx, OutputStream, RequestKind, ResponseKind,
};
