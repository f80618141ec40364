//! Strata storage node: accepts chunks under signed relay commands, serves
//! them back, replicates them to peers and keeps the control node informed.

pub mod authz;
pub mod config;
pub mod context;
pub mod control;
pub mod error;
pub mod integrity;
pub mod node;
pub mod registration;
pub mod routes;
pub mod sending_queue;
pub mod storage;

pub use error::NodeError;

/// Software string reported to the control node and on `/hello`.
pub const SOFTWARE: &str = concat!("strata-storage-node ", env!("CARGO_PKG_VERSION"));
