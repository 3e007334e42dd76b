// Remote side of the cache: the ranged transport and its HTTP backend.

pub mod content_range;
pub mod http_source;
pub mod traits;
