#![forbid(unsafe_code)]

//! Aggregation layer over a video platform's internal web API.
//!
//! Listings (channel uploads, search results, comments, playlists, related
//! videos) are crawled page by page in the background into an in-memory
//! cache, so callers get whatever has been gathered so far together with a
//! freshness status instead of waiting for a full crawl.

pub mod assembler;
pub mod cache;
pub mod config;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod records;
pub mod resolver;
pub mod service;
pub mod session;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;
