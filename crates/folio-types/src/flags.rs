//! Asset notification flags and download state.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// What changed in an asset update notification.
    ///
    /// Several flags can arrive together: a finished download that replaced
    /// the content carries `FILE_UPDATED | DOWNLOAD_SUCCESSFUL`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct UpdateFlags: u8 {
        /// The content bytes (and modification time) changed.
        const FILE_UPDATED = 1 << 0;
        /// A download finished successfully, whether or not content changed.
        const DOWNLOAD_SUCCESSFUL = 1 << 1;
        /// A download failed.
        const DOWNLOAD_FAILED = 1 << 2;
        /// Cached metadata (ttl, content type) changed without new content.
        const CACHE_DATA_UPDATED = 1 << 3;
        /// First notification a subscriber receives for an asset.
        const INITIAL = 1 << 4;
    }
}

impl UpdateFlags {
    /// Flags that mean "something observable about the asset changed".
    pub fn is_content_event(&self) -> bool {
        self.intersects(Self::FILE_UPDATED | Self::DOWNLOAD_SUCCESSFUL | Self::DOWNLOAD_FAILED)
    }
}

/// Where an asset's refresh stands.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    #[default]
    Idle,
    InProgress,
    Succeeded,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn content_event_flags() {
        assert!(UpdateFlags::FILE_UPDATED.is_content_event());
        assert!((UpdateFlags::DOWNLOAD_FAILED | UpdateFlags::INITIAL).is_content_event());
        assert!(!UpdateFlags::CACHE_DATA_UPDATED.is_content_event());
        assert!(!UpdateFlags::empty().is_content_event());
    }

    #[test]
    fn download_state_strings() {
        assert_eq!(DownloadState::InProgress.to_string(), "in_progress");
        assert_eq!(DownloadState::from_str("failed").unwrap(), DownloadState::Failed);
        assert_eq!(DownloadState::default(), DownloadState::Idle);
    }
}
