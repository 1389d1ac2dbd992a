//! Core gateway functionality
//!
//! - [`transport`]: the serial side — device link, FIFO correlation queue,
//!   worker thread.
//! - [`server`]: the TCP side — listener, per-connection handlers.
//! - [`acl`]: client address filtering.

pub mod acl;
pub mod server;
pub mod transport;
