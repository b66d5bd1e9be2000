//! Cache strategies.

pub mod passthrough;
pub mod server_side;

pub use passthrough::PassthroughCacheStrategy;
pub use server_side::{CacheBranch, DEFAULT_MIN_CACHE_WORDS, ServerSideCacheStrategy};
