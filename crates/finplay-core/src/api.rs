//! Media server API surface
//!
//! Wire types mirror the server's JSON (PascalCase field names). The
//! [`MediaServerApi`] trait is the seam every component talks through, so
//! tests and embedders can substitute their own transport.

use crate::{
    config::ServerContext,
    profile::DeviceProfile,
    types::*,
    Error, Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream::BoxStream, StreamExt, TryStreamExt};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Streamed response body
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Body of `POST /Items/{id}/PlaybackInfo`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackInfoRequest {
    pub device_profile: DeviceProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_source_id: Option<MediaSourceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_stream_index: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_stream_index: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_streaming_bitrate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time_ticks: Option<Ticks>,
    pub enable_direct_play: bool,
    pub enable_direct_stream: bool,
    pub enable_transcoding: bool,
    pub auto_open_live_stream: bool,
}

/// Response of `POST /Items/{id}/PlaybackInfo`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PlaybackInfoResponse {
    pub media_sources: Vec<MediaSourceInfo>,
    pub play_session_id: Option<PlaySessionId>,
    pub error_code: Option<String>,
}

/// One deliverable version of an item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MediaSourceInfo {
    pub id: String,
    pub container: Option<String>,
    pub supports_direct_play: bool,
    pub supports_direct_stream: bool,
    pub supports_transcoding: bool,
    pub transcoding_url: Option<String>,
    pub transcoding_sub_protocol: Option<String>,
    #[serde(rename = "ETag")]
    pub e_tag: Option<String>,
    pub live_stream_id: Option<String>,
    pub media_streams: Vec<MediaStream>,
    pub default_audio_stream_index: Option<i32>,
    pub default_subtitle_stream_index: Option<i32>,
    pub bitrate: Option<u64>,
    pub run_time_ticks: Option<Ticks>,
}

impl MediaSourceInfo {
    /// True when the server offers an HLS transcoding playlist
    pub fn is_adaptive_transcode(&self) -> bool {
        self.transcoding_sub_protocol
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case("hls"))
    }
}

/// Kind of an elementary stream inside a media source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaStreamType {
    Video,
    Audio,
    Subtitle,
    #[serde(other)]
    Other,
}

/// Elementary stream descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaStream {
    pub index: i32,
    #[serde(rename = "Type")]
    pub stream_type: MediaStreamType,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub display_title: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_forced: bool,
    #[serde(default)]
    pub is_external: bool,
    #[serde(default)]
    pub channels: Option<u32>,
}

/// Progress event names understood by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressEvent {
    TimeUpdate,
    Pause,
    Unpause,
}

/// Body of `POST /Sessions/Playing`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackStartInfo {
    pub item_id: ItemId,
    pub media_source_id: MediaSourceId,
    pub play_session_id: PlaySessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_stream_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_stream_index: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_stream_index: Option<i32>,
    pub position_ticks: Ticks,
    pub is_paused: bool,
    pub can_seek: bool,
    pub play_method: DeliveryMode,
}

/// Body of `POST /Sessions/Playing/Progress`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackProgressInfo {
    pub item_id: ItemId,
    pub media_source_id: MediaSourceId,
    pub play_session_id: PlaySessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_stream_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_stream_index: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_stream_index: Option<i32>,
    pub position_ticks: Ticks,
    pub is_paused: bool,
    pub can_seek: bool,
    pub play_method: DeliveryMode,
    pub event_name: ProgressEvent,
}

/// Body of `POST /Sessions/Playing/Stopped`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackStopInfo {
    pub item_id: ItemId,
    pub media_source_id: MediaSourceId,
    pub play_session_id: PlaySessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_stream_id: Option<String>,
    pub position_ticks: Ticks,
    pub failed: bool,
}

/// Calls the playback engine makes against the media server
#[async_trait]
pub trait MediaServerApi: Send + Sync {
    /// Ask how an item should be delivered
    async fn playback_info(
        &self,
        item_id: &ItemId,
        request: &PlaybackInfoRequest,
    ) -> Result<PlaybackInfoResponse>;

    /// Open the bitrate test payload as a byte stream
    async fn bitrate_test(&self, size: u64) -> Result<ByteStream>;

    async fn report_started(&self, info: &PlaybackStartInfo) -> Result<()>;

    async fn report_progress(&self, info: &PlaybackProgressInfo) -> Result<()>;

    async fn report_stopped(&self, info: &PlaybackStopInfo) -> Result<()>;
}

/// reqwest-backed [`MediaServerApi`]
pub struct HttpMediaServer {
    client: Client,
    context: ServerContext,
}

impl HttpMediaServer {
    /// Build a client with the given request timeout
    pub fn new(context: ServerContext, request_timeout: Duration) -> Result<Self> {
        context.validate()?;
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(format!("{}/{}", context.client_name, context.client_version))
            .build()?;
        Ok(Self { client, context })
    }

    /// Wrap an existing client
    pub fn with_client(client: Client, context: ServerContext) -> Self {
        Self { client, context }
    }

    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header(header::AUTHORIZATION, self.context.authorization_header())
            .header(header::ACCEPT, "application/json")
    }

    async fn post_report<T: Serialize + Sync>(&self, endpoint: &'static str, body: &T) -> Result<()> {
        let url = self.context.endpoint(endpoint)?;
        let response = self
            .authorized(self.client.post(url))
            .json(body)
            .send()
            .await
            .map_err(map_timeout)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ReportRejected {
                endpoint,
                status: status.as_u16(),
            });
        }
        debug!(endpoint, status = status.as_u16(), "Report accepted");
        Ok(())
    }
}

#[async_trait]
impl MediaServerApi for HttpMediaServer {
    #[instrument(skip(self, request), fields(item_id = %item_id))]
    async fn playback_info(
        &self,
        item_id: &ItemId,
        request: &PlaybackInfoRequest,
    ) -> Result<PlaybackInfoResponse> {
        let url = self
            .context
            .endpoint(&format!("/Items/{}/PlaybackInfo", item_id))?;

        let response = self
            .authorized(self.client.post(url.clone()))
            .json(request)
            .send()
            .await
            .map_err(map_timeout)?;

        check_status(response.status(), &url)?;
        Ok(response.json::<PlaybackInfoResponse>().await?)
    }

    #[instrument(skip(self))]
    async fn bitrate_test(&self, size: u64) -> Result<ByteStream> {
        let mut url = self.context.endpoint("/Playback/BitrateTest")?;
        url.query_pairs_mut().append_pair("size", &size.to_string());

        // The client timeout also bounds this transfer; with the default
        // config the probe's own deadline expires first
        let response = self
            .authorized(self.client.get(url.clone()))
            .send()
            .await
            .map_err(map_timeout)?;

        check_status(response.status(), &url)?;
        Ok(response.bytes_stream().map_err(Error::from).boxed())
    }

    async fn report_started(&self, info: &PlaybackStartInfo) -> Result<()> {
        self.post_report("/Sessions/Playing", info).await
    }

    async fn report_progress(&self, info: &PlaybackProgressInfo) -> Result<()> {
        self.post_report("/Sessions/Playing/Progress", info).await
    }

    async fn report_stopped(&self, info: &PlaybackStopInfo) -> Result<()> {
        self.post_report("/Sessions/Playing/Stopped", info).await
    }
}

fn check_status(status: StatusCode, url: &url::Url) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(Error::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

fn map_timeout(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::ConnectionTimeout
    } else {
        Error::Network(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_playback_info_response() {
        let json = r#"{
            "MediaSources": [{
                "Id": "src1",
                "Container": "mkv",
                "SupportsDirectPlay": false,
                "SupportsDirectStream": false,
                "SupportsTranscoding": true,
                "TranscodingUrl": "/videos/x/master.m3u8?MediaSourceId=src1",
                "TranscodingSubProtocol": "hls",
                "ETag": "e1",
                "MediaStreams": [
                    {"Index": 0, "Type": "Video", "Codec": "hevc"},
                    {"Index": 1, "Type": "Audio", "Codec": "truehd", "IsDefault": true, "Channels": 8},
                    {"Index": 2, "Type": "EmbeddedImage"}
                ],
                "DefaultAudioStreamIndex": 1
            }],
            "PlaySessionId": "ps-1"
        }"#;

        let response: PlaybackInfoResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.play_session_id, Some(PlaySessionId::new("ps-1")));
        let source = &response.media_sources[0];
        assert!(source.is_adaptive_transcode());
        assert_eq!(source.e_tag.as_deref(), Some("e1"));
        assert_eq!(source.media_streams[2].stream_type, MediaStreamType::Other);
        assert_eq!(source.default_audio_stream_index, Some(1));
    }

    #[test]
    fn progress_report_uses_server_field_names() {
        let info = PlaybackProgressInfo {
            item_id: "item".into(),
            media_source_id: "src".into(),
            play_session_id: "ps".into(),
            live_stream_id: None,
            audio_stream_index: Some(1),
            subtitle_stream_index: Some(-1),
            position_ticks: Ticks(42),
            is_paused: true,
            can_seek: true,
            play_method: DeliveryMode::DirectStream,
            event_name: ProgressEvent::Pause,
        };

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["PlaySessionId"], "ps");
        assert_eq!(value["PositionTicks"], 42);
        assert_eq!(value["SubtitleStreamIndex"], -1);
        assert_eq!(value["PlayMethod"], "DirectStream");
        assert_eq!(value["EventName"], "Pause");
        assert!(value.get("LiveStreamId").is_none());
    }
}
