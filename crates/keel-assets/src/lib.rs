//! Asset fetching and decoding off the render thread.
//!
//! [`AssetLoader`] owns a small worker pool pulling jobs from one shared queue.
//! Requests are deduplicated by key: asking twice for the same texture or model
//! path returns the same [`AssetSlot`] and fetches once. The render loop calls
//! [`AssetLoader::poll`] each frame to collect finished work; it never blocks.

mod error;
mod fetch;
mod loader;
mod pool;

pub use error::{FetchError, LoadError};
pub use fetch::{FileFetcher, Fetcher, HttpFetcher, fetcher_for};
pub use loader::{AssetLoader, AssetSlot, DecodedImage, LoadEvent, ModelHandle, TextureHandle};
pub use pool::DEFAULT_WORKERS;
