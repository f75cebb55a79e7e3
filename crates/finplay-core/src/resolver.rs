//! Media source resolution
//!
//! Turns a negotiated [`DeliveryPlan`] into something the player can load.
//! Adaptive transcodes get an HLS source built from the master playlist;
//! if that fails the same URL is handed over as a progressive source so
//! playback can still start in a degraded mode.

use crate::{
    manifest::{AdaptiveManifest, HlsManifestLoader, ManifestLoader, Variant},
    negotiator::DeliveryPlan,
    types::SubProtocol,
    Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// What kind of source a handle wraps
#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    Adaptive(AdaptiveManifest),
    Progressive,
}

/// A loadable media source, owned by whoever holds it
///
/// Disposal consumes the handle, so a disposed source cannot be attached or
/// disposed again.
#[derive(Debug, PartialEq)]
pub struct MediaSourceHandle {
    url: Url,
    kind: SourceKind,
}

impl MediaSourceHandle {
    pub fn adaptive(manifest: AdaptiveManifest) -> Self {
        Self {
            url: manifest.url.clone(),
            kind: SourceKind::Adaptive(manifest),
        }
    }

    pub fn progressive(url: Url) -> Self {
        Self {
            url,
            kind: SourceKind::Progressive,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn is_adaptive(&self) -> bool {
        matches!(self.kind, SourceKind::Adaptive(_))
    }

    /// Highest advertised variant bandwidth; progressive sources have none
    pub fn initial_bitrate(&self) -> Option<u64> {
        match &self.kind {
            SourceKind::Adaptive(manifest) => manifest.max_bandwidth(),
            SourceKind::Progressive => None,
        }
    }

    pub fn variants(&self) -> &[Variant] {
        match &self.kind {
            SourceKind::Adaptive(manifest) => &manifest.variants,
            SourceKind::Progressive => &[],
        }
    }

    /// Release the source
    pub fn dispose(self) {
        debug!(url = %self.url.path(), adaptive = self.is_adaptive(), "Media source disposed");
    }
}

/// Creates player sources
#[async_trait]
pub trait MediaSourceFactory: Send + Sync {
    async fn create_adaptive(&self, url: &Url) -> Result<MediaSourceHandle>;

    fn create_progressive(&self, url: &Url) -> MediaSourceHandle;
}

/// Default factory: loads the HLS master playlist to build adaptive sources
pub struct HlsSourceFactory {
    loader: Arc<dyn ManifestLoader>,
}

impl HlsSourceFactory {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            loader: Arc::new(HlsManifestLoader::new(timeout)?),
        })
    }

    pub fn with_loader(loader: Arc<dyn ManifestLoader>) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl MediaSourceFactory for HlsSourceFactory {
    async fn create_adaptive(&self, url: &Url) -> Result<MediaSourceHandle> {
        let manifest = self.loader.load(url).await?;
        Ok(MediaSourceHandle::adaptive(manifest))
    }

    fn create_progressive(&self, url: &Url) -> MediaSourceHandle {
        MediaSourceHandle::progressive(url.clone())
    }
}

/// Picks adaptive or progressive loading for a plan
pub struct MediaSourceResolver {
    factory: Arc<dyn MediaSourceFactory>,
}

impl MediaSourceResolver {
    pub fn new(factory: Arc<dyn MediaSourceFactory>) -> Self {
        Self { factory }
    }

    /// Never fails: adaptive errors degrade to a progressive source
    #[instrument(skip(self, plan), fields(item_id = %plan.item_id, mode = %plan.mode))]
    pub async fn resolve(&self, plan: &DeliveryPlan) -> MediaSourceHandle {
        if plan.sub_protocol != SubProtocol::Adaptive {
            return self.factory.create_progressive(&plan.transport_url);
        }

        match self.factory.create_adaptive(&plan.transport_url).await {
            Ok(handle) => {
                info!(
                    initial_bitrate = ?handle.initial_bitrate(),
                    variants = handle.variants().len(),
                    "Adaptive source ready"
                );
                handle
            }
            Err(e) => {
                warn!(error = %e, "Adaptive source failed; falling back to progressive");
                self.factory.create_progressive(&plan.transport_url)
            }
        }
    }
}
