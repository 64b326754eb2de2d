//! Short-lived credential caching.

mod cache;

pub use cache::{AccessToken, TokenCache, TokenSource, DEFAULT_REFRESH_BUFFER};
