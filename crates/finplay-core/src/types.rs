//! Core types for finplay

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Local identifier for one playback attempt, used to correlate logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Server-side item identifier
    ItemId
);
string_id!(
    /// Identifier of one media source (file/version) of an item
    MediaSourceId
);
string_id!(
    /// Server-issued identifier correlating every report of one playback
    PlaySessionId
);

/// Playback position in 100 nanosecond units, as the server counts time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticks(pub i64);

impl Ticks {
    pub const ZERO: Ticks = Ticks(0);
    pub const PER_SECOND: i64 = 10_000_000;

    pub fn from_duration(duration: Duration) -> Self {
        Self((duration.as_nanos() / 100).min(i64::MAX as u128) as i64)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs.max(0.0) * Self::PER_SECOND as f64) as i64)
    }

    /// Negative tick counts clamp to zero
    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.0.max(0) as u64 * 100)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / Self::PER_SECOND as f64
    }
}

impl std::fmt::Display for Ticks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total = self.as_duration().as_secs();
        write!(f, "{}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
    }
}

/// Video codec types the capability builder knows how to detect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
    Hevc,
    Vp8,
    Vp9,
    Av1,
}

impl VideoCodec {
    pub const ALL: [VideoCodec; 5] = [
        VideoCodec::H264,
        VideoCodec::Hevc,
        VideoCodec::Vp8,
        VideoCodec::Vp9,
        VideoCodec::Av1,
    ];

    /// Codec name as the server spells it in profiles
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::Hevc => "hevc",
            VideoCodec::Vp8 => "vp8",
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Av1 => "av1",
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "H.264/AVC"),
            VideoCodec::Hevc => write!(f, "H.265/HEVC"),
            VideoCodec::Vp8 => write!(f, "VP8"),
            VideoCodec::Vp9 => write!(f, "VP9"),
            VideoCodec::Av1 => write!(f, "AV1"),
        }
    }
}

/// Audio codec types the capability builder knows how to detect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioCodec {
    Flac,
    Aac,
    Mp3,
    Ac3,
    Eac3,
    Mp2,
    Dts,
    TrueHd,
    Vorbis,
    Opus,
}

impl AudioCodec {
    pub const ALL: [AudioCodec; 10] = [
        AudioCodec::Flac,
        AudioCodec::Aac,
        AudioCodec::Mp3,
        AudioCodec::Ac3,
        AudioCodec::Eac3,
        AudioCodec::Mp2,
        AudioCodec::Dts,
        AudioCodec::TrueHd,
        AudioCodec::Vorbis,
        AudioCodec::Opus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioCodec::Flac => "flac",
            AudioCodec::Aac => "aac",
            AudioCodec::Mp3 => "mp3",
            AudioCodec::Ac3 => "ac3",
            AudioCodec::Eac3 => "eac3",
            AudioCodec::Mp2 => "mp2",
            AudioCodec::Dts => "dts",
            AudioCodec::TrueHd => "truehd",
            AudioCodec::Vorbis => "vorbis",
            AudioCodec::Opus => "opus",
        }
    }
}

impl std::fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioCodec::Flac => write!(f, "FLAC"),
            AudioCodec::Aac => write!(f, "AAC"),
            AudioCodec::Mp3 => write!(f, "MP3"),
            AudioCodec::Ac3 => write!(f, "AC-3"),
            AudioCodec::Eac3 => write!(f, "E-AC-3"),
            AudioCodec::Mp2 => write!(f, "MP2"),
            AudioCodec::Dts => write!(f, "DTS"),
            AudioCodec::TrueHd => write!(f, "TrueHD"),
            AudioCodec::Vorbis => write!(f, "Vorbis"),
            AudioCodec::Opus => write!(f, "Opus"),
        }
    }
}

/// How the server delivers the chosen media source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryMode {
    /// Original file, unmodified
    DirectPlay,
    /// Original streams, remuxed into another container
    DirectStream,
    /// Re-encoded by the server
    Transcode,
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMode::DirectPlay => write!(f, "DirectPlay"),
            DeliveryMode::DirectStream => write!(f, "DirectStream"),
            DeliveryMode::Transcode => write!(f, "Transcode"),
        }
    }
}

/// Transport shape of the stream handed to the player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubProtocol {
    /// Plain progressive download/stream
    Progressive,
    /// Playlist of bitrate renditions (HLS)
    Adaptive,
}

/// Audio/subtitle stream indices for one playback
///
/// `subtitle == Some(-1)` means subtitles were explicitly turned off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamSelection {
    pub audio: Option<i32>,
    pub subtitle: Option<i32>,
}

impl StreamSelection {
    pub const SUBTITLES_OFF: i32 = -1;

    pub fn new(audio: Option<i32>, subtitle: Option<i32>) -> Self {
        Self { audio, subtitle }
    }
}

/// Player lifecycle controller states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerState {
    /// No session
    Idle,
    /// Probing, negotiating and resolving a source
    Resolving,
    /// Source attached to the player
    Loaded,
    /// Media is playing
    Playing,
    /// Playback paused
    Paused,
    /// Media reached its end
    Ended,
    /// Stopped externally
    Stopped,
    /// Source and player released
    Disposed,
    /// Negotiation failed; playback never started
    Failed,
}

impl ControllerState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: ControllerState) -> bool {
        use ControllerState::*;
        matches!(
            (self, target),
            // From Idle
            (Idle, Resolving) |
            // From Resolving
            (Resolving, Loaded) | (Resolving, Failed) |
            // From Loaded
            (Loaded, Playing) | (Loaded, Stopped) |
            // From Playing
            (Playing, Paused) | (Playing, Ended) | (Playing, Stopped) |
            // From Paused
            (Paused, Playing) | (Paused, Ended) | (Paused, Stopped) |
            // Terminal states
            (Ended, Disposed) | (Stopped, Disposed) |
            // Ready for the next session
            (Disposed, Idle) | (Failed, Idle)
        )
    }

    /// True while a session owns a source and a heartbeat
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ControllerState::Loaded | ControllerState::Playing | ControllerState::Paused
        )
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Idle => write!(f, "idle"),
            ControllerState::Resolving => write!(f, "resolving"),
            ControllerState::Loaded => write!(f, "loaded"),
            ControllerState::Playing => write!(f, "playing"),
            ControllerState::Paused => write!(f, "paused"),
            ControllerState::Ended => write!(f, "ended"),
            ControllerState::Stopped => write!(f, "stopped"),
            ControllerState::Disposed => write!(f, "disposed"),
            ControllerState::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_round_trip_through_duration() {
        let ticks = Ticks::from_duration(Duration::from_secs(90));
        assert_eq!(ticks.0, 900_000_000);
        assert_eq!(ticks.as_duration(), Duration::from_secs(90));
        assert_eq!(ticks.to_string(), "0:01:30");
    }

    #[test]
    fn negative_ticks_clamp() {
        assert_eq!(Ticks(-5).as_duration(), Duration::ZERO);
        assert_eq!(Ticks::from_secs_f64(-1.0), Ticks::ZERO);
    }

    #[test]
    fn controller_paths() {
        use ControllerState::*;
        assert!(Idle.can_transition_to(Resolving));
        assert!(Resolving.can_transition_to(Failed));
        assert!(Playing.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Playing));
        assert!(Stopped.can_transition_to(Disposed));

        assert!(!Idle.can_transition_to(Playing));
        assert!(!Failed.can_transition_to(Loaded));
        assert!(!Disposed.can_transition_to(Playing));
        assert!(!Ended.can_transition_to(Playing));
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ItemId::new("abc123");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc123\"");
    }
}
