//! Adaptive (HLS) master playlist loading
//!
//! The resolver only needs the variant ladder of a transcoding playlist:
//! enough to confirm the adaptive source is playable and to seed the
//! player's initial bitrate with the highest advertised bandwidth.

mod hls;

pub use hls::{parse_master, HlsManifestLoader};

use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use url::Url;

/// Frame size advertised by a variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// One bitrate rendition of a master playlist
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variant {
    /// Peak bits per second (`BANDWIDTH`)
    pub bandwidth: u64,
    pub resolution: Option<Resolution>,
    pub codecs: Option<String>,
    /// Absolute media playlist URL
    pub uri: Url,
}

/// Parsed master playlist, variants sorted by ascending bandwidth
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveManifest {
    pub url: Url,
    pub variants: Vec<Variant>,
}

impl AdaptiveManifest {
    /// Highest advertised bandwidth
    pub fn max_bandwidth(&self) -> Option<u64> {
        self.variants.iter().map(|v| v.bandwidth).max()
    }
}

/// Fetches and parses adaptive playlists
#[async_trait]
pub trait ManifestLoader: Send + Sync {
    async fn load(&self, url: &Url) -> Result<AdaptiveManifest>;
}
