//! Shared identifiers, update flags and error taxonomy for folio.
//!
//! This crate has **no internal folio dependencies**. It is a pure leaf crate the
//! task pipeline, asset layer, glyph cache and document controller build on.
//!
//! # Key Types
//!
//! |-------------------|----------------------------------------------------|
//! | Type              | Purpose                                            |
//! |-------------------|----------------------------------------------------|
//! | [`HolderId`]      | Who holds a read lock (opaque, never an address)   |
//! | [`TaskId`]        | Which background task a completion belongs to      |
//! | [`WorkerId`]      | Which worker execution context ran a task          |
//! | [`AssetId`]       | Stable asset identity, orders multi-asset locking  |
//! | [`UpdateFlags`]   | What changed in an asset notification              |
//! | [`DownloadState`] | Where an asset's refresh stands                    |
//! | [`FolioError`]    | Cross-component error taxonomy                     |
//! |-------------------|----------------------------------------------------|

pub mod error;
pub mod flags;
pub mod ids;

pub use error::{FolioError, NetworkError};
pub use flags::{DownloadState, UpdateFlags};
pub use ids::{AssetId, HolderId, SubscriptionId, TaskId, WorkerId};
