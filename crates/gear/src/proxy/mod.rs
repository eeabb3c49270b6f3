//! Proxy endpoint pool
//!
//! Endpoints carry a credit balance. [`ProxyPool::get`] hands out the
//! endpoint with the most credits and charges it one; [`ProxyPool::feedback`]
//! refunds one after a successful use, so endpoints that keep completing
//! work keep getting picked.

mod pool;

pub use pool::{ProxyEntry, ProxyPool, ProxyPoolConfig};
