//! Object store access for the asset cache.
//!
//! This crate provides:
//! - The `ObjectFetcher` trait the cache downloads through
//! - HTTP(S) streaming downloads
//! - R2 / S3 downloads for `r2://` and `s3://` locators
//! - `ObjectStore`, which routes a locator to the fetcher for its scheme

pub mod client;
pub mod error;
pub mod fetcher;
pub mod http;

pub use client::{ObjectLocation, R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use fetcher::{scheme_of, ObjectFetcher, ObjectStore};
pub use http::{HttpFetcher, HttpFetcherConfig};
