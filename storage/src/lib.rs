//! Record store and result sinks
//!
//! This crate provides:
//!
//! - [`MemoryStore`]: an in-process [`RecordStore`](unibench_core::RecordStore)
//! - [`MongoStore`]: a record store on a live MongoDB deployment
//! - [`StoreResultSink`]: results written into any record store
//! - [`JsonDirSink`]: results written as JSON files
//! - [`FanOutSink`]: one result written to several sinks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod mongo;
pub mod sink;

pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use sink::{
    sanitize_server_status, FanOutSink, JsonDirSink, StoreResultSink, HISTORY_COLLECTION,
    RESULTS_COLLECTION, RESULTS_DATABASE,
};
