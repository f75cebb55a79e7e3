//! Device capability profile
//!
//! Turns the local decoder inventory into the `DeviceProfile` the server uses
//! to pick a delivery mode. The profile is built once and shared read-only;
//! a negotiation that needs a narrower bitrate takes a copy through
//! [`DeviceProfile::with_streaming_ceiling`].

use crate::{types::*, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

/// Highest bitrate offered for streamed (remuxed or transcoded) playback
pub const MAX_STREAMING_BITRATE: u64 = 120_000_000;
/// Highest bitrate offered for static file playback
pub const MAX_STATIC_BITRATE: u64 = 100_000_000;
/// Ceiling for audio-only transcodes
pub const MUSIC_TRANSCODING_BITRATE: u64 = 384_000;
/// Output width the device renders at
pub const MAX_VIDEO_WIDTH: u32 = 1920;
/// Channel count assumed when the audio device cannot be queried
pub const DEFAULT_AUDIO_CHANNELS: u32 = 2;

/// Local decode capability as reported by the platform
#[async_trait]
pub trait CodecCapabilities: Send + Sync {
    /// Names of available video decoders
    async fn video_decoders(&self) -> Vec<String>;

    /// Names of available audio decoders
    async fn audio_decoders(&self) -> Vec<String>;

    /// Channel count of the default audio render device
    async fn audio_channel_count(&self) -> Result<u32>;
}

/// Fixed capability list, for headless use and tests
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities {
    pub video: Vec<String>,
    pub audio: Vec<String>,
    /// `None` behaves like a missing audio device
    pub channels: Option<u32>,
}

impl StaticCapabilities {
    pub fn new<V, A>(video: V, audio: A, channels: Option<u32>) -> Self
    where
        V: IntoIterator,
        V::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        Self {
            video: video.into_iter().map(Into::into).collect(),
            audio: audio.into_iter().map(Into::into).collect(),
            channels,
        }
    }
}

#[async_trait]
impl CodecCapabilities for StaticCapabilities {
    async fn video_decoders(&self) -> Vec<String> {
        self.video.clone()
    }

    async fn audio_decoders(&self) -> Vec<String> {
        self.audio.clone()
    }

    async fn audio_channel_count(&self) -> Result<u32> {
        self.channels
            .ok_or_else(|| crate::Error::Internal("no audio render device".into()))
    }
}

/// Decoder names collected into case-insensitive sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderInventory {
    video: HashSet<String>,
    audio: HashSet<String>,
}

impl DecoderInventory {
    pub fn new<V, A>(video: V, audio: A) -> Self
    where
        V: IntoIterator,
        V::Item: AsRef<str>,
        A: IntoIterator,
        A::Item: AsRef<str>,
    {
        Self {
            video: video.into_iter().map(|s| s.as_ref().to_ascii_lowercase()).collect(),
            audio: audio.into_iter().map(|s| s.as_ref().to_ascii_lowercase()).collect(),
        }
    }

    pub fn supports_video(&self, codec: VideoCodec) -> bool {
        video_aliases(codec).iter().any(|alias| self.video.contains(*alias))
    }

    pub fn supports_audio(&self, codec: AudioCodec) -> bool {
        audio_aliases(codec).iter().any(|alias| self.audio.contains(*alias))
    }
}

fn video_aliases(codec: VideoCodec) -> &'static [&'static str] {
    match codec {
        VideoCodec::H264 => &["h264", "avc", "avc1"],
        VideoCodec::Hevc => &["hevc", "h265", "hvc1", "hev1"],
        VideoCodec::Vp8 => &["vp8", "vp80"],
        VideoCodec::Vp9 => &["vp9", "vp90"],
        VideoCodec::Av1 => &["av1", "av01"],
    }
}

fn audio_aliases(codec: AudioCodec) -> &'static [&'static str] {
    match codec {
        AudioCodec::Flac => &["flac"],
        AudioCodec::Aac => &["aac", "mp4a"],
        AudioCodec::Mp3 => &["mp3"],
        AudioCodec::Ac3 => &["ac3", "ac-3"],
        AudioCodec::Eac3 => &["eac3", "ec-3"],
        AudioCodec::Mp2 => &["mp2"],
        AudioCodec::Dts => &["dts", "dca"],
        AudioCodec::TrueHd => &["truehd", "mlp"],
        AudioCodec::Vorbis => &["vorbis"],
        AudioCodec::Opus => &["opus"],
    }
}

/// Media kind a profile entry applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileType {
    Video,
    Audio,
}

/// Container/codec combination the device plays without server help
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DirectPlayProfile {
    pub container: String,
    #[serde(rename = "Type")]
    pub profile_type: ProfileType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub video_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub audio_codec: Option<String>,
}

/// Target format the server may transcode into
///
/// The first entry of `audio_codec` is what the server encodes to when it
/// has to re-encode audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TranscodingProfile {
    pub container: String,
    #[serde(rename = "Type")]
    pub profile_type: ProfileType,
    pub audio_codec: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub video_codec: Option<String>,
    pub context: String,
    pub protocol: String,
    pub max_audio_channels: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub min_segments: Option<u32>,
    #[serde(default)]
    pub break_on_non_key_frames: bool,
}

/// Single limit inside a codec profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProfileCondition {
    pub condition: String,
    pub property: String,
    pub value: String,
    pub is_required: bool,
}

/// Limits that apply to a codec regardless of container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CodecProfile {
    #[serde(rename = "Type")]
    pub profile_type: ProfileType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub codec: Option<String>,
    pub conditions: Vec<ProfileCondition>,
}

/// Immutable description of what this device can play
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceProfile {
    name: String,
    max_streaming_bitrate: u64,
    max_static_bitrate: u64,
    music_streaming_transcoding_bitrate: u64,
    direct_play_profiles: Vec<DirectPlayProfile>,
    transcoding_profiles: Vec<TranscodingProfile>,
    codec_profiles: Vec<CodecProfile>,
}

impl DeviceProfile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_streaming_bitrate(&self) -> u64 {
        self.max_streaming_bitrate
    }

    pub fn max_static_bitrate(&self) -> u64 {
        self.max_static_bitrate
    }

    pub fn music_streaming_transcoding_bitrate(&self) -> u64 {
        self.music_streaming_transcoding_bitrate
    }

    pub fn direct_play_profiles(&self) -> &[DirectPlayProfile] {
        &self.direct_play_profiles
    }

    pub fn transcoding_profiles(&self) -> &[TranscodingProfile] {
        &self.transcoding_profiles
    }

    pub fn codec_profiles(&self) -> &[CodecProfile] {
        &self.codec_profiles
    }

    /// Width limit declared for video, if any
    pub fn max_video_width(&self) -> Option<u32> {
        self.codec_profiles
            .iter()
            .filter(|p| p.profile_type == ProfileType::Video)
            .flat_map(|p| &p.conditions)
            .find(|c| c.property == "Width" && c.condition == "LessThanEqual")
            .and_then(|c| c.value.parse().ok())
    }

    /// Audio codecs the server may transcode to, in preference order
    pub fn transcoding_audio_codecs(&self) -> Vec<&str> {
        self.transcoding_profiles
            .iter()
            .find(|p| p.profile_type == ProfileType::Video)
            .map(|p| p.audio_codec.split(',').collect())
            .unwrap_or_default()
    }

    /// Session-scoped copy whose streaming bitrate never exceeds `ceiling`
    ///
    /// A zero ceiling is treated as 1 bps so the server never sees an
    /// unlimited (zero) value.
    pub fn with_streaming_ceiling(&self, ceiling: u64) -> DeviceProfile {
        let ceiling = ceiling.max(1);
        let mut copy = self.clone();
        copy.max_streaming_bitrate = self.max_streaming_bitrate.min(ceiling);
        copy.music_streaming_transcoding_bitrate =
            self.music_streaming_transcoding_bitrate.min(copy.max_streaming_bitrate);
        copy
    }
}

/// Build the profile from a decoder inventory and channel count
///
/// Deterministic: the same inputs always give the same profile.
pub fn build_profile(inventory: &DecoderInventory, audio_channels: u32) -> DeviceProfile {
    let video_codecs: Vec<&str> = [VideoCodec::H264, VideoCodec::Hevc, VideoCodec::Av1, VideoCodec::Vp9]
        .into_iter()
        .filter(|c| inventory.supports_video(*c))
        .map(|c| c.as_str())
        .collect();

    let can_aac = inventory.supports_audio(AudioCodec::Aac);
    let can_mp3 = inventory.supports_audio(AudioCodec::Mp3);
    let can_ac3 = inventory.supports_audio(AudioCodec::Ac3);
    let can_eac3 = can_ac3 && inventory.supports_audio(AudioCodec::Eac3);
    let can_mp2 = inventory.supports_audio(AudioCodec::Mp2);

    let mut video_audio_codecs: Vec<&str> = Vec::new();
    let mut hls_ts_audio_codecs: Vec<&str> = Vec::new();
    let mut hls_fmp4_audio_codecs: Vec<&str> = Vec::new();

    if inventory.supports_audio(AudioCodec::Flac) {
        video_audio_codecs.push("flac");
    }

    // AAC and MP3 lead the transcoding lists
    if can_aac {
        video_audio_codecs.push("aac");
        hls_ts_audio_codecs.push("aac");
        hls_fmp4_audio_codecs.push("aac");
    }
    if can_mp3 {
        video_audio_codecs.push("mp3");
        hls_ts_audio_codecs.push("mp3");
        hls_fmp4_audio_codecs.push("mp3");
    }

    // AC3/EAC3 mainly for remuxing; only a transcode target when AAC and MP3 are missing
    if can_ac3 {
        video_audio_codecs.push("ac3");
        hls_ts_audio_codecs.push("ac3");
        hls_fmp4_audio_codecs.push("ac3");
        if can_eac3 {
            video_audio_codecs.push("eac3");
            hls_ts_audio_codecs.push("eac3");
            hls_fmp4_audio_codecs.push("eac3");
        }
    }

    if can_mp2 {
        video_audio_codecs.push("mp2");
        hls_ts_audio_codecs.push("mp2");
        hls_fmp4_audio_codecs.push("mp2");
    }

    if inventory.supports_audio(AudioCodec::Dts) {
        video_audio_codecs.push("dca");
        video_audio_codecs.push("dts");
    }
    if inventory.supports_audio(AudioCodec::TrueHd) {
        video_audio_codecs.push("truehd");
    }

    if hls_ts_audio_codecs.is_empty() {
        warn!("No transcodable audio decoder found; requesting AAC anyway");
        hls_ts_audio_codecs.push("aac");
        hls_fmp4_audio_codecs.push("aac");
    }

    let mut direct_play_profiles = Vec::new();

    if !video_codecs.is_empty() {
        direct_play_profiles.push(DirectPlayProfile {
            container: "mp4,m4v".to_string(),
            profile_type: ProfileType::Video,
            video_codec: Some(video_codecs.join(",")),
            audio_codec: Some(video_audio_codecs.join(",")),
        });

        let mut mkv_video: Vec<&str> = video_codecs.clone();
        if inventory.supports_video(VideoCodec::Vp8) {
            mkv_video.push("vp8");
        }
        direct_play_profiles.push(DirectPlayProfile {
            container: "mkv".to_string(),
            profile_type: ProfileType::Video,
            video_codec: Some(mkv_video.join(",")),
            audio_codec: Some(video_audio_codecs.join(",")),
        });
    }

    let can_vp8 = inventory.supports_video(VideoCodec::Vp8);
    let can_vp9 = inventory.supports_video(VideoCodec::Vp9);
    if can_vp8 || can_vp9 {
        let webm_video: Vec<&str> = [(can_vp8, "vp8"), (can_vp9, "vp9")]
            .into_iter()
            .filter_map(|(ok, name)| ok.then_some(name))
            .collect();
        let webm_audio: Vec<&str> = [AudioCodec::Vorbis, AudioCodec::Opus]
            .into_iter()
            .filter(|c| inventory.supports_audio(*c))
            .map(|c| c.as_str())
            .collect();
        direct_play_profiles.push(DirectPlayProfile {
            container: "webm".to_string(),
            profile_type: ProfileType::Video,
            video_codec: Some(webm_video.join(",")),
            audio_codec: (!webm_audio.is_empty()).then(|| webm_audio.join(",")),
        });
    }

    for codec in AudioCodec::ALL {
        if let Some(container) = audio_container(codec) {
            if inventory.supports_audio(codec) {
                direct_play_profiles.push(DirectPlayProfile {
                    container: container.to_string(),
                    profile_type: ProfileType::Audio,
                    video_codec: None,
                    audio_codec: Some(codec.as_str().to_string()),
                });
            }
        }
    }

    let hls_video = if inventory.supports_video(VideoCodec::Hevc) {
        "h264,hevc"
    } else {
        "h264"
    };
    let channels = audio_channels.to_string();

    let transcoding_profiles = vec![
        TranscodingProfile {
            container: "ts".to_string(),
            profile_type: ProfileType::Video,
            audio_codec: hls_ts_audio_codecs.join(","),
            video_codec: Some("h264".to_string()),
            context: "Streaming".to_string(),
            protocol: "hls".to_string(),
            max_audio_channels: channels.clone(),
            min_segments: Some(1),
            break_on_non_key_frames: true,
        },
        TranscodingProfile {
            container: "mp4".to_string(),
            profile_type: ProfileType::Video,
            audio_codec: hls_fmp4_audio_codecs.join(","),
            video_codec: Some(hls_video.to_string()),
            context: "Streaming".to_string(),
            protocol: "hls".to_string(),
            max_audio_channels: channels,
            min_segments: Some(1),
            break_on_non_key_frames: true,
        },
        TranscodingProfile {
            container: "mp3".to_string(),
            profile_type: ProfileType::Audio,
            audio_codec: "mp3".to_string(),
            video_codec: None,
            context: "Streaming".to_string(),
            protocol: "http".to_string(),
            max_audio_channels: "2".to_string(),
            min_segments: None,
            break_on_non_key_frames: false,
        },
    ];

    let codec_profiles = vec![CodecProfile {
        profile_type: ProfileType::Video,
        codec: None,
        conditions: vec![ProfileCondition {
            condition: "LessThanEqual".to_string(),
            property: "Width".to_string(),
            value: MAX_VIDEO_WIDTH.to_string(),
            is_required: false,
        }],
    }];

    DeviceProfile {
        name: "finplay".to_string(),
        max_streaming_bitrate: MAX_STREAMING_BITRATE,
        max_static_bitrate: MAX_STATIC_BITRATE,
        music_streaming_transcoding_bitrate: MAX_STREAMING_BITRATE.min(MUSIC_TRANSCODING_BITRATE),
        direct_play_profiles,
        transcoding_profiles,
        codec_profiles,
    }
}

fn audio_container(codec: AudioCodec) -> Option<&'static str> {
    match codec {
        AudioCodec::Flac => Some("flac"),
        AudioCodec::Aac => Some("m4a,aac"),
        AudioCodec::Mp3 => Some("mp3"),
        AudioCodec::Vorbis | AudioCodec::Opus => Some("ogg,webm"),
        _ => None,
    }
}

/// Queries platform capabilities and builds the profile
pub struct DeviceProfileBuilder {
    capabilities: Arc<dyn CodecCapabilities>,
    channel_query_timeout: Duration,
}

impl DeviceProfileBuilder {
    pub fn new(capabilities: Arc<dyn CodecCapabilities>, channel_query_timeout: Duration) -> Self {
        Self {
            capabilities,
            channel_query_timeout,
        }
    }

    /// Query decoders and channel count, then build
    #[instrument(skip(self))]
    pub async fn build(&self) -> DeviceProfile {
        let video = self.capabilities.video_decoders().await;
        let audio = self.capabilities.audio_decoders().await;
        let inventory = DecoderInventory::new(&video, &audio);
        let channels = self.audio_channel_count().await;

        let profile = build_profile(&inventory, channels);
        info!(
            video_decoders = video.len(),
            audio_decoders = audio.len(),
            channels,
            direct_play_profiles = profile.direct_play_profiles.len(),
            "Device profile built"
        );
        profile
    }

    /// Best-effort channel count; any failure falls back to stereo
    pub async fn audio_channel_count(&self) -> u32 {
        match tokio::time::timeout(self.channel_query_timeout, self.capabilities.audio_channel_count()).await {
            Ok(Ok(channels)) if channels > 0 => channels,
            Ok(Ok(_)) => {
                debug!("Audio device reported zero channels; using default");
                DEFAULT_AUDIO_CHANNELS
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Audio channel query failed; using default");
                DEFAULT_AUDIO_CHANNELS
            }
            Err(_) => {
                warn!(timeout_ms = self.channel_query_timeout.as_millis(), "Audio channel query timed out; using default");
                DEFAULT_AUDIO_CHANNELS
            }
        }
    }
}

/// Builds the profile on first use and shares it afterwards
pub struct ProfileCache {
    builder: DeviceProfileBuilder,
    profile: OnceCell<Arc<DeviceProfile>>,
}

impl ProfileCache {
    pub fn new(builder: DeviceProfileBuilder) -> Self {
        Self {
            builder,
            profile: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Arc<DeviceProfile> {
        self.profile
            .get_or_init(|| async { Arc::new(self.builder.build().await) })
            .await
            .clone()
    }
}
