//! HTTP transport used by fetch hooks
//!
//! [`HttpFetcher`] executes an [`HttpRequest`] and buffers the response into
//! a [`FetchResult`]. Requests may name a proxy, typically one handed out by
//! [`crate::proxy::ProxyPool`].

mod http;

pub use http::{FetchError, FetchResult, HttpFetcher, HttpMethod, HttpRequest};
