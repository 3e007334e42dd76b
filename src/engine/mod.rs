// Cache engine: pending-range tracking, the fetch loop and the reader façades.

pub mod buffer;
mod fetcher;
pub mod pending;
pub mod stats;
pub mod stream;
pub mod sync_reader;
