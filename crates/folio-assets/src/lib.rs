//! Document assets and the locks that let many readers share them.
//!
//! |------------------|------------------------------------------------------|
//! | Type             | Purpose                                              |
//! |------------------|------------------------------------------------------|
//! | [`AssetLock`]    | Callback-based reader/writer lock of one asset       |
//! | [`lock_set`]     | All-or-nothing and sequential locking of asset sets  |
//! | [`ReadLockTable`]| Ref-counted read locks per holder over an asset set  |
//! | [`DocumentAsset`]| Shared, versioned, downloadable content              |
//! | [`AssetLibrary`] | One asset per URL, cache paths, downloads            |
//! | [`Fetcher`]      | Where bytes come from (network, disk, memory)        |
//! |------------------|------------------------------------------------------|
//!
//! Everything except [`Fetcher`] lives on the owner context and is `!Send`;
//! only fetches run on the library's worker thread.

mod asset;
mod error;
mod fetcher;
mod library;
mod lock;
pub mod lock_set;
mod read_table;

pub use asset::{DocumentAsset, image_dimensions};
pub use error::{AssetError, Result};
pub use fetcher::{FetchedContent, Fetcher, FsFetcher, StaticFetcher, guess_content_type};
pub use library::{AssetLibrary, AssetProvider, DEFAULT_TTL, LibraryConfig, default_cache_dir};
pub use lock::AssetLock;
pub use read_table::ReadLockTable;
