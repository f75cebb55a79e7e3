//! Finplay Core - playback session engine for Jellyfin-compatible servers
//!
//! This crate negotiates and runs one playback at a time:
//! - Device capability profile building
//! - Bitrate probing against the server
//! - PlaybackInfo negotiation (direct play, direct stream, transcode)
//! - Adaptive (HLS) or progressive media source resolution
//! - Start/progress/stop session reporting with a heartbeat
//! - Player lifecycle control
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Finplay Core                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │   Profile    │  │   Bitrate    │  │   Playback   │           │
//! │  │   Builder    │─▶│   Prober     │─▶│  Negotiator  │           │
//! │  └──────────────┘  └──────────────┘  └──────┬───────┘           │
//! │                                             │                   │
//! │                    ┌──────────────┐  ┌──────┴───────┐           │
//! │                    │    Player    │◀─│ Media Source │           │
//! │                    │  Controller  │  │   Resolver   │           │
//! │                    └──────┬───────┘  └──────────────┘           │
//! │                           │                                     │
//! │             ┌─────────────┴─────────────┐                       │
//! │      ┌──────┴───────┐            ┌──────┴───────┐               │
//! │      │   Session    │◀───────────│  Heartbeat   │               │
//! │      │   Reporter   │            │              │               │
//! │      └──────────────┘            └──────────────┘               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod heartbeat;
pub mod manifest;
pub mod negotiator;
pub mod probe;
pub mod profile;
pub mod reporter;
pub mod resolver;
pub mod streams;
pub mod types;

pub use api::{HttpMediaServer, MediaServerApi};
pub use config::{ServerContext, SessionConfig};
pub use controller::{
    ControllerHandle, ControllerInput, MediaPlayer, PlaybackController, PlaybackSessionState,
    PlayerEvent, PlayerEventSink, PlayerFactory,
};
pub use error::{Error, Result};
pub use heartbeat::Heartbeat;
pub use manifest::{AdaptiveManifest, HlsManifestLoader, ManifestLoader};
pub use negotiator::{DeliveryPlan, PlaybackNegotiator, PlaybackRequest};
pub use probe::{BitrateProber, ProbeReport};
pub use profile::{
    build_profile, CodecCapabilities, DecoderInventory, DeviceProfile, DeviceProfileBuilder,
    ProfileCache, StaticCapabilities,
};
pub use reporter::{ReportTicket, SessionReporter};
pub use resolver::{HlsSourceFactory, MediaSourceFactory, MediaSourceHandle, MediaSourceResolver};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version; the embedding app installs the subscriber
pub fn init() {
    tracing::info!(version = VERSION, "Finplay core initialized");
}
