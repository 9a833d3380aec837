//! Concrete implementations of the trait seams in `crate::traits`.
//!
//! - [`ReqwestHttpClient`] - production HTTP client using reqwest
//! - [`mock`] - test doubles (`MockHttpClient`, `MockBackend`)

pub mod mock;
pub mod reqwest_http;

pub use reqwest_http::ReqwestHttpClient;
