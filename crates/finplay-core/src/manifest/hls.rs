//! HLS master playlist loader

use super::{AdaptiveManifest, ManifestLoader, Resolution, Variant};
use crate::{error::Error, Result};
use async_trait::async_trait;
use m3u8_rs::{MasterPlaylist, Playlist};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

/// Loads master playlists over HTTP
pub struct HlsManifestLoader {
    client: Client,
}

impl HlsManifestLoader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManifestLoader for HlsManifestLoader {
    #[instrument(skip(self), fields(url = %url))]
    async fn load(&self, url: &Url) -> Result<AdaptiveManifest> {
        debug!("Fetching HLS master playlist");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::ManifestFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ManifestFetch(format!("HTTP {}", status.as_u16())));
        }

        let content = response
            .bytes()
            .await
            .map_err(|e| Error::ManifestFetch(e.to_string()))?;

        parse_master(&content, url)
    }
}

/// Parse a master playlist body; relative variant URIs resolve against `url`
pub fn parse_master(content: &[u8], url: &Url) -> Result<AdaptiveManifest> {
    let master = match m3u8_rs::parse_playlist_res(content) {
        Ok(Playlist::MasterPlaylist(master)) => master,
        Ok(Playlist::MediaPlaylist(_)) => {
            return Err(Error::ManifestParse(
                "expected a master playlist, got a media playlist".to_string(),
            ))
        }
        Err(e) => {
            return Err(Error::ManifestParse(format!(
                "Failed to parse HLS master: {:?}",
                e
            )))
        }
    };

    let variants = extract_variants(&master, url)?;
    if variants.is_empty() {
        return Err(Error::EmptyManifest);
    }

    debug!(
        variants = variants.len(),
        max_bandwidth = variants.last().map(|v| v.bandwidth),
        "Parsed HLS master playlist"
    );

    Ok(AdaptiveManifest {
        url: url.clone(),
        variants,
    })
}

fn extract_variants(master: &MasterPlaylist, base_url: &Url) -> Result<Vec<Variant>> {
    let mut variants = Vec::with_capacity(master.variants.len());

    for variant in master.variants.iter().filter(|v| !v.is_i_frame) {
        let uri = match base_url.join(&variant.uri) {
            Ok(uri) => uri,
            Err(e) => {
                warn!(uri = %variant.uri, error = %e, "Skipping variant with bad URI");
                continue;
            }
        };

        variants.push(Variant {
            bandwidth: variant.bandwidth,
            resolution: variant.resolution.map(|r| Resolution {
                width: r.width as u32,
                height: r.height as u32,
            }),
            codecs: variant.codecs.clone(),
            uri,
        });
    }

    variants.sort_by_key(|v| v.bandwidth);
    Ok(variants)
}
