//! Seekable, readable view of a remote resource that is cached into a local
//! buffer by a single background range-fetch loop while it is being read.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod source;

pub use config::CacheConfig;
pub use engine::buffer::{LocalBuffer, MemoryBuffer, MmapBuffer};
pub use engine::pending::{Interval, PendingRanges};
pub use engine::stream::{ProgressiveCacheStream, TransferHandle};
pub use engine::sync_reader::SynchronizedReader;
pub use error::StreamError;
pub use source::traits::{RangeResponse, RangeTransport, SourceInfo};
