//! Atom feeds for social network accounts, fetched through the vendor API
//! with OAuth2-delegated credentials.
//!
//! - [`auth`] - token lifecycle: exchange, refresh, cache, revoke
//! - [`gateway`] - authenticated API calls with a single retry on 401
//! - [`ratelimit`] - fixed-window limiting per remote address
//! - [`service`] - framework-neutral request handlers
//! - [`cache`] and [`storage`] - the volatile cache and the token database

pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod feed;
pub mod gateway;
mod http;
pub mod ratelimit;
pub mod service;
pub mod storage;

pub use http::HttpError;
