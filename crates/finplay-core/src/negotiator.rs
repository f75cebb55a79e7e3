//! Playback negotiation
//!
//! Posts the device profile and the user's stream choices to the server's
//! PlaybackInfo endpoint and turns the first returned media source into a
//! [`DeliveryPlan`]. Delivery precedence is fixed: direct play, then direct
//! stream, then transcode. A source that allows none of them fails the
//! request for good.

use crate::{
    api::{MediaServerApi, MediaSourceInfo, PlaybackInfoRequest},
    config::ServerContext,
    profile::DeviceProfile,
    streams,
    types::*,
    Error, Result,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Everything needed to ask the server for a delivery plan
#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    pub item_id: ItemId,
    /// Resume a specific media source
    pub media_source_id: Option<MediaSourceId>,
    /// Explicit audio/subtitle choice
    pub streams: StreamSelection,
    /// Resume position
    pub start_position: Option<Ticks>,
    /// Process-wide profile; never modified here
    pub profile: Arc<DeviceProfile>,
    /// Probed ceiling; narrows a session copy of the profile
    pub bitrate_ceiling: Option<u64>,
}

impl PlaybackRequest {
    pub fn new(item_id: impl Into<ItemId>, profile: Arc<DeviceProfile>) -> Self {
        Self {
            item_id: item_id.into(),
            media_source_id: None,
            streams: StreamSelection::default(),
            start_position: None,
            profile,
            bitrate_ceiling: None,
        }
    }

    pub fn with_media_source(mut self, id: impl Into<MediaSourceId>) -> Self {
        self.media_source_id = Some(id.into());
        self
    }

    pub fn with_streams(mut self, audio: Option<i32>, subtitle: Option<i32>) -> Self {
        self.streams = StreamSelection::new(audio, subtitle);
        self
    }

    pub fn with_start_position(mut self, position: Ticks) -> Self {
        self.start_position = Some(position);
        self
    }

    pub fn with_bitrate_ceiling(mut self, bps: u64) -> Self {
        self.bitrate_ceiling = Some(bps);
        self
    }

    /// Profile copy sent with this request
    pub fn session_profile(&self) -> DeviceProfile {
        match self.bitrate_ceiling {
            Some(ceiling) => self.profile.with_streaming_ceiling(ceiling),
            None => self.profile.as_ref().clone(),
        }
    }
}

/// Negotiated way to deliver one item
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryPlan {
    pub item_id: ItemId,
    pub media_source: MediaSourceInfo,
    pub mode: DeliveryMode,
    pub sub_protocol: SubProtocol,
    pub streams: StreamSelection,
    /// Authenticated transport URL
    pub transport_url: Url,
    /// Echoed on every report of this session
    pub play_session_id: PlaySessionId,
}

impl DeliveryPlan {
    pub fn media_source_id(&self) -> MediaSourceId {
        MediaSourceId::new(self.media_source.id.clone())
    }

    pub fn live_stream_id(&self) -> Option<&str> {
        self.media_source.live_stream_id.as_deref()
    }
}

/// Delivery mode and transport shape for a source, by fixed precedence
pub fn select_mode(source: &MediaSourceInfo) -> Option<(DeliveryMode, SubProtocol)> {
    if source.supports_direct_play {
        Some((DeliveryMode::DirectPlay, SubProtocol::Progressive))
    } else if source.supports_direct_stream {
        Some((DeliveryMode::DirectStream, SubProtocol::Progressive))
    } else if source.supports_transcoding {
        let protocol = if source.is_adaptive_transcode() {
            SubProtocol::Adaptive
        } else {
            SubProtocol::Progressive
        };
        Some((DeliveryMode::Transcode, protocol))
    } else {
        None
    }
}

/// Static file URL for direct play and direct stream
pub fn static_stream_url(context: &ServerContext, item_id: &ItemId, source: &MediaSourceInfo) -> Result<Url> {
    let container = source
        .container
        .as_deref()
        .and_then(|c| c.split(',').map(str::trim).find(|c| !c.is_empty()))
        .ok_or_else(|| Error::MissingContainer {
            media_source_id: source.id.clone(),
        })?;

    let mut url = context.endpoint(&format!("/Videos/{}/stream.{}", item_id, container))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("static", "true")
            .append_pair("mediaSourceId", &source.id)
            .append_pair("deviceId", &context.device_id);
        if let Some(tag) = &source.e_tag {
            query.append_pair("tag", tag);
        }
        if let Some(live) = &source.live_stream_id {
            query.append_pair("LiveStreamId", live);
        }
        // The server's URL builder has no token support; append it here
        query.append_pair("api_key", &context.access_token);
    }
    Ok(url)
}

/// Server-issued transcoding URL resolved against the configured base
pub fn transcoding_url(context: &ServerContext, source: &MediaSourceInfo) -> Result<Url> {
    let relative = source
        .transcoding_url
        .as_deref()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| Error::MissingTranscodingUrl {
            media_source_id: source.id.clone(),
        })?;

    let mut url = match Url::parse(relative) {
        Ok(absolute) if matches!(absolute.scheme(), "http" | "https") => absolute,
        _ => {
            let separator = if relative.starts_with('/') { "" } else { "/" };
            Url::parse(&format!("{}{}{}", context.base_str(), separator, relative))?
        }
    };

    let has_token = url
        .query_pairs()
        .any(|(k, _)| k.eq_ignore_ascii_case("api_key") || k.eq_ignore_ascii_case("apikey"));
    if !has_token {
        url.query_pairs_mut().append_pair("api_key", &context.access_token);
    }
    Ok(url)
}

/// Asks the server how to deliver an item
pub struct PlaybackNegotiator {
    api: Arc<dyn MediaServerApi>,
    context: ServerContext,
}

impl PlaybackNegotiator {
    pub fn new(api: Arc<dyn MediaServerApi>, context: ServerContext) -> Self {
        Self { api, context }
    }

    /// Negotiate a delivery plan; every error here is terminal for the request
    #[instrument(skip(self, request), fields(item_id = %request.item_id))]
    pub async fn negotiate(&self, request: &PlaybackRequest) -> Result<DeliveryPlan> {
        let profile = request.session_profile();
        let body = PlaybackInfoRequest {
            max_streaming_bitrate: Some(profile.max_streaming_bitrate()),
            device_profile: profile,
            media_source_id: request.media_source_id.clone(),
            audio_stream_index: request.streams.audio,
            subtitle_stream_index: request.streams.subtitle,
            start_time_ticks: request.start_position,
            enable_direct_play: true,
            enable_direct_stream: true,
            enable_transcoding: true,
            auto_open_live_stream: true,
        };

        let response = self.api.playback_info(&request.item_id, &body).await?;

        if let Some(code) = response.error_code {
            warn!(code = %code, "Server refused playback");
            return Err(Error::PlaybackRefused { code });
        }

        let source_count = response.media_sources.len();
        let source = response
            .media_sources
            .into_iter()
            .next()
            .ok_or_else(|| Error::NoMediaSources {
                item_id: request.item_id.to_string(),
            })?;
        if source_count > 1 {
            // Only the first source is ever played
            debug!(ignored = source_count - 1, "Ignoring additional media sources");
        }

        let play_session_id = response.play_session_id.ok_or(Error::MissingPlaySessionId)?;

        let (mode, sub_protocol) = select_mode(&source).ok_or_else(|| Error::NoViableDelivery {
            media_source_id: source.id.clone(),
        })?;

        let transport_url = match mode {
            DeliveryMode::DirectPlay | DeliveryMode::DirectStream => {
                static_stream_url(&self.context, &request.item_id, &source)?
            }
            DeliveryMode::Transcode => transcoding_url(&self.context, &source)?,
        };

        let streams = streams::resolve_selection(request.streams, &source);

        info!(
            media_source_id = %source.id,
            mode = %mode,
            sub_protocol = ?sub_protocol,
            play_session_id = %play_session_id,
            "Delivery negotiated"
        );

        Ok(DeliveryPlan {
            item_id: request.item_id.clone(),
            media_source: source,
            mode,
            sub_protocol,
            streams,
            transport_url,
            play_session_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ServerContext {
        ServerContext::new(Url::parse("http://server:8096").unwrap(), "tok", "dev-1")
    }

    fn source() -> MediaSourceInfo {
        MediaSourceInfo {
            id: "src1".into(),
            container: Some("mp4".into()),
            ..Default::default()
        }
    }

    #[test]
    fn direct_play_beats_transcode() {
        let mut src = source();
        src.supports_direct_play = true;
        src.supports_direct_stream = true;
        src.supports_transcoding = true;
        src.transcoding_sub_protocol = Some("hls".into());
        assert_eq!(
            select_mode(&src),
            Some((DeliveryMode::DirectPlay, SubProtocol::Progressive))
        );
    }

    #[test]
    fn direct_stream_beats_transcode() {
        let mut src = source();
        src.supports_direct_stream = true;
        src.supports_transcoding = true;
        assert_eq!(select_mode(&src).map(|m| m.0), Some(DeliveryMode::DirectStream));
    }

    #[test]
    fn transcode_sub_protocols() {
        let mut src = source();
        src.supports_transcoding = true;
        assert_eq!(
            select_mode(&src),
            Some((DeliveryMode::Transcode, SubProtocol::Progressive))
        );
        src.transcoding_sub_protocol = Some("HLS".into());
        assert_eq!(
            select_mode(&src),
            Some((DeliveryMode::Transcode, SubProtocol::Adaptive))
        );
    }

    #[test]
    fn nothing_supported_is_none() {
        assert_eq!(select_mode(&source()), None);
    }

    #[test]
    fn static_url_carries_source_tag_and_token() {
        let mut src = source();
        src.e_tag = Some("etag1".into());
        src.live_stream_id = Some("live9".into());
        let url = static_stream_url(&context(), &ItemId::new("item1"), &src).unwrap();

        assert_eq!(url.path(), "/Videos/item1/stream.mp4");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("static".into(), "true".into())));
        assert!(pairs.contains(&("mediaSourceId".into(), "src1".into())));
        assert!(pairs.contains(&("deviceId".into(), "dev-1".into())));
        assert!(pairs.contains(&("tag".into(), "etag1".into())));
        assert!(pairs.contains(&("LiveStreamId".into(), "live9".into())));
        assert!(pairs.contains(&("api_key".into(), "tok".into())));
    }

    #[test]
    fn static_url_uses_first_container() {
        let mut src = source();
        src.container = Some("mov,mp4,m4a".into());
        let url = static_stream_url(&context(), &ItemId::new("i"), &src).unwrap();
        assert!(url.path().ends_with("stream.mov"));

        src.container = None;
        assert!(matches!(
            static_stream_url(&context(), &ItemId::new("i"), &src),
            Err(Error::MissingContainer { .. })
        ));
    }

    #[test]
    fn transcoding_url_joins_base_and_appends_token() {
        let mut src = source();
        src.transcoding_url = Some("/videos/x/master.m3u8".into());
        let url = transcoding_url(&context(), &src).unwrap();
        assert_eq!(url.as_str(), "http://server:8096/videos/x/master.m3u8?api_key=tok");
    }

    #[test]
    fn transcoding_url_keeps_base_path_prefix() {
        let ctx = ServerContext::new(Url::parse("https://host/jellyfin/").unwrap(), "tok", "d");
        let mut src = source();
        src.transcoding_url = Some("/videos/x/master.m3u8?MediaSourceId=src1".into());
        let url = transcoding_url(&ctx, &src).unwrap();
        assert!(url
            .as_str()
            .starts_with("https://host/jellyfin/videos/x/master.m3u8?MediaSourceId=src1"));
    }

    #[test]
    fn transcoding_url_does_not_duplicate_token() {
        let mut src = source();
        src.transcoding_url = Some("/videos/x/master.m3u8?ApiKey=server".into());
        let url = transcoding_url(&context(), &src).unwrap();
        assert_eq!(url.query(), Some("ApiKey=server"));
    }
}
