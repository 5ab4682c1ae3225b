//! Cached HTTP access to the Volvo API

pub mod cache;
pub mod client;
pub mod transport;

pub use cache::{CacheEntry, CacheKey, ResponseCache};
pub use client::{CachedClient, ClientSettings, ClientStats, RequestOptions};
pub use transport::{RawResponse, ReqwestTransport, Transport};
