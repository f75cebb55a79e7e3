//! CLI command implementations

use crate::output::{self, emit, OutputFormat};
use crate::{CapabilityArgs, ItemArgs};
use anyhow::{bail, Context};
use finplay_core::{
    BitrateProber, DeliveryPlan, DeviceProfile, DeviceProfileBuilder, HlsSourceFactory,
    HttpMediaServer, MediaPlayer, MediaServerApi, MediaSourceHandle, PlaybackController,
    PlaybackNegotiator, PlaybackRequest, PlayerEvent, PlayerEventSink, PlayerFactory,
    ServerContext, SessionConfig, StaticCapabilities, Ticks,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

/// Server connection flags
pub struct Remote {
    pub server: Option<String>,
    pub token: Option<String>,
    pub device_id: String,
}

impl Remote {
    fn context(&self) -> anyhow::Result<ServerContext> {
        let Some(server) = &self.server else {
            bail!("--server (or FINPLAY_SERVER) is required for this command");
        };
        let Some(token) = &self.token else {
            bail!("--token (or FINPLAY_TOKEN) is required for this command");
        };

        let base = Url::parse(server).with_context(|| format!("invalid server url '{}'", server))?;
        let context = ServerContext::new(base, token.clone(), self.device_id.clone())
            .with_device_name("finplay-cli")
            .with_client("finplay-cli", env!("CARGO_PKG_VERSION"));
        context.validate()?;
        Ok(context)
    }

    fn api(&self, config: &SessionConfig) -> anyhow::Result<(ServerContext, Arc<dyn MediaServerApi>)> {
        let context = self.context()?;
        let api: Arc<dyn MediaServerApi> =
            Arc::new(HttpMediaServer::new(context.clone(), config.request_timeout())?);
        Ok((context, api))
    }
}

/// Defaults, optionally overridden by a JSON file
pub fn load_config(path: Option<&Path>) -> anyhow::Result<SessionConfig> {
    let config = match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            SessionConfig::from_json(&json)?
        }
        None => SessionConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

async fn build_profile(caps: &CapabilityArgs, config: &SessionConfig) -> DeviceProfile {
    let capabilities = StaticCapabilities::new(split_list(&caps.video), split_list(&caps.audio), caps.channels);
    DeviceProfileBuilder::new(Arc::new(capabilities), config.channel_query_timeout())
        .build()
        .await
}

fn playback_request(item: &ItemArgs, profile: DeviceProfile) -> PlaybackRequest {
    let mut request = PlaybackRequest::new(item.item.as_str(), Arc::new(profile))
        .with_streams(item.audio_index, item.subtitle_index);
    if let Some(source) = &item.source {
        request = request.with_media_source(source.as_str());
    }
    if let Some(start) = item.start {
        request = request.with_start_position(Ticks::from_secs_f64(start));
    }
    request
}

/// Hide the access token when printing URLs
fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if k.eq_ignore_ascii_case("api_key") { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), value)
        })
        .collect();
    if pairs.is_empty() {
        return shown.to_string();
    }
    shown.query_pairs_mut().clear().extend_pairs(pairs);
    shown.to_string()
}

/// Print the device profile
pub async fn profile(caps: &CapabilityArgs, config: &SessionConfig, format: OutputFormat) -> anyhow::Result<()> {
    let profile = build_profile(caps, config).await;

    emit(&profile, format, |p| {
        let mut out = String::from("Device Profile:\n");
        out += &format!("  Max streaming bitrate: {}\n", output::bitrate(p.max_streaming_bitrate()));
        out += &format!("  Max static bitrate:    {}\n", output::bitrate(p.max_static_bitrate()));
        out += &format!(
            "  Music transcoding:     {}\n",
            output::bitrate(p.music_streaming_transcoding_bitrate())
        );
        if let Some(width) = p.max_video_width() {
            out += &format!("  Max video width:       {}\n", width);
        }

        out += "\nDirect play:\n";
        for dp in p.direct_play_profiles() {
            out += &format!(
                "  {:<8} {:?}  video={}  audio={}\n",
                dp.container,
                dp.profile_type,
                dp.video_codec.as_deref().unwrap_or("-"),
                dp.audio_codec.as_deref().unwrap_or("-")
            );
        }

        out += "\nTranscoding:\n";
        for tp in p.transcoding_profiles() {
            out += &format!(
                "  {:<4} {:<5} {:?}  audio={}\n",
                tp.container, tp.protocol, tp.profile_type, tp.audio_codec
            );
        }
        out
    })
}

/// Run the bitrate probe
pub async fn probe(remote: &Remote, config: &SessionConfig, format: OutputFormat) -> anyhow::Result<()> {
    let (_, api) = remote.api(config)?;
    let prober = BitrateProber::new(api, config);

    let report = prober.measure().await?;
    let ceiling = prober.clamp(report.bitrate);

    emit(&report, format, |r| {
        format!(
            "Bitrate Probe:\n  Bytes read: {}\n  Elapsed:    {:.2}s\n  Timed out:  {}\n  Estimate:   {}\n  Ceiling:    {}",
            r.bytes_read,
            r.elapsed.as_secs_f64(),
            r.timed_out,
            r.bitrate.map(output::bitrate).unwrap_or_else(|| "n/a".to_string()),
            output::bitrate(ceiling)
        )
    })
}

fn describe_plan(plan: &DeliveryPlan) -> String {
    let mut out = String::from("Delivery Plan:\n");
    out += &format!("  Item:          {}\n", plan.item_id);
    out += &format!("  Media source:  {}\n", plan.media_source.id);
    out += &format!("  Mode:          {}\n", plan.mode);
    out += &format!("  Sub-protocol:  {:?}\n", plan.sub_protocol);
    out += &format!("  Play session:  {}\n", plan.play_session_id);
    out += &format!(
        "  Streams:       audio={:?} subtitle={:?}\n",
        plan.streams.audio, plan.streams.subtitle
    );
    out += &format!("  URL:           {}", redact(&plan.transport_url));
    out
}

/// Negotiate delivery for one item
pub async fn negotiate(
    remote: &Remote,
    item: &ItemArgs,
    caps: &CapabilityArgs,
    config: &SessionConfig,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let (context, api) = remote.api(config)?;
    let mut request = playback_request(item, build_profile(caps, config).await);

    if config.probe_enabled && !item.no_probe {
        let ceiling = BitrateProber::new(api.clone(), config).probe_ceiling().await;
        request = request.with_bitrate_ceiling(ceiling);
    }

    let plan = PlaybackNegotiator::new(api, context).negotiate(&request).await?;
    let mut shown = plan.clone();
    shown.transport_url = Url::parse(&redact(&plan.transport_url))?;
    emit(&shown, format, describe_plan)
}

/// Play an item with the headless player for `seconds`, then stop
pub async fn play(
    remote: &Remote,
    item: &ItemArgs,
    caps: &CapabilityArgs,
    config: &SessionConfig,
    seconds: u64,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut config = config.clone();
    if item.no_probe {
        config.probe_enabled = false;
    }

    let (context, api) = remote.api(&config)?;
    let sources = Arc::new(HlsSourceFactory::new(config.request_timeout())?);
    let mut controller = PlaybackController::new(api, context, &config, sources, Arc::new(HeadlessPlayers))?;

    let request = playback_request(item, build_profile(caps, &config).await);
    let session = controller.play(request).await?;
    emit(&session, format, |s| {
        format!(
            "Playing {} ({}) play session {} for {}s",
            s.item_id, s.play_method, s.play_session_id, seconds
        )
    })?;

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            stepped = controller.step() => {
                stepped?;
                if controller.session().is_none() {
                    break;
                }
            }
        }
    }

    controller.shutdown().await?;
    info!("Session finished");
    Ok(())
}

/// Creates [`HeadlessPlayer`]s
struct HeadlessPlayers;

impl PlayerFactory for HeadlessPlayers {
    fn create(&self) -> Box<dyn MediaPlayer> {
        Box::new(HeadlessPlayer::default())
    }
}

/// Player that only keeps a clock; nothing is decoded
#[derive(Default)]
struct HeadlessPlayer {
    sink: Option<PlayerEventSink>,
    source: Option<MediaSourceHandle>,
    played: Ticks,
    resumed: Option<Instant>,
}

impl MediaPlayer for HeadlessPlayer {
    fn set_event_sink(&mut self, sink: Option<PlayerEventSink>) {
        self.sink = sink;
    }

    fn attach_source(&mut self, source: MediaSourceHandle, start: Ticks) -> finplay_core::Result<()> {
        if self.source.is_some() {
            return Err(finplay_core::Error::PlayerAttach(
                "a source is already attached".to_string(),
            ));
        }
        info!(
            url = %redact(source.url()),
            adaptive = source.is_adaptive(),
            initial_bitrate = ?source.initial_bitrate(),
            "Source attached"
        );
        self.source = Some(source);
        self.played = start;
        Ok(())
    }

    fn detach_source(&mut self) -> Option<MediaSourceHandle> {
        self.source.take()
    }

    fn play(&mut self) {
        if self.resumed.is_none() {
            self.resumed = Some(Instant::now());
            if let Some(sink) = &self.sink {
                sink.emit(PlayerEvent::Playing);
            }
        }
    }

    fn pause(&mut self) {
        if let Some(resumed) = self.resumed.take() {
            self.played = Ticks(self.played.0 + Ticks::from_duration(resumed.elapsed()).0);
            if let Some(sink) = &self.sink {
                sink.emit(PlayerEvent::Paused);
            }
        }
    }

    fn position(&self) -> Ticks {
        match self.resumed {
            Some(resumed) => Ticks(self.played.0 + Ticks::from_duration(resumed.elapsed()).0),
            None => self.played,
        }
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn dispose(self: Box<Self>) {
        debug!(position = %self.position(), "Headless player disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_hides_token_only() {
        let url = Url::parse("http://srv/Videos/1/stream.mkv?static=true&api_key=secret").unwrap();
        let shown = redact(&url);
        assert!(shown.contains("static=true"));
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn split_list_trims() {
        assert_eq!(split_list(" h264, ,hevc "), vec!["h264", "hevc"]);
    }

    #[tokio::test(start_paused = true)]
    async fn headless_clock_tracks_play_time() {
        let mut player = HeadlessPlayer::default();
        player
            .attach_source(
                MediaSourceHandle::progressive(Url::parse("http://srv/a.mkv").unwrap()),
                Ticks::from_duration(Duration::from_secs(10)),
            )
            .unwrap();
        player.play();
        tokio::time::sleep(Duration::from_secs(5)).await;
        player.pause();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(player.position(), Ticks::from_duration(Duration::from_secs(15)));
        assert!(player.detach_source().is_some());
    }

    #[test]
    fn headless_player_takes_one_source_at_a_time() {
        let url = Url::parse("http://srv/a.mkv").unwrap();
        let mut player = HeadlessPlayer::default();
        player
            .attach_source(MediaSourceHandle::progressive(url.clone()), Ticks::ZERO)
            .unwrap();

        let err = player
            .attach_source(MediaSourceHandle::progressive(url), Ticks::ZERO)
            .unwrap_err();
        assert!(matches!(err, finplay_core::Error::PlayerAttach(_)));
    }
}
