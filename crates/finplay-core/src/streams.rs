//! Default audio/subtitle stream selection
//!
//! Explicit choices always pass through untouched. Without one, the source's
//! declared default index wins, then a stream carrying the default flag, then
//! the first stream in display order.

use crate::api::{MediaSourceInfo, MediaStream, MediaStreamType};
use crate::types::StreamSelection;
use std::cmp::Ordering;

/// Display order: embedded before external, unforced before forced,
/// non-default before default, then by index
pub fn compare_streams(a: &MediaStream, b: &MediaStream) -> Ordering {
    a.is_external
        .cmp(&b.is_external)
        .then(a.is_forced.cmp(&b.is_forced))
        .then(a.is_default.cmp(&b.is_default))
        .then(a.index.cmp(&b.index))
}

/// Streams of one kind in display order
pub fn ordered_streams(source: &MediaSourceInfo, kind: MediaStreamType) -> Vec<&MediaStream> {
    let mut streams: Vec<&MediaStream> = source
        .media_streams
        .iter()
        .filter(|s| s.stream_type == kind)
        .collect();
    streams.sort_by(|a, b| compare_streams(a, b));
    streams
}

/// Audio stream to play when the user made no choice
pub fn default_audio_index(source: &MediaSourceInfo) -> Option<i32> {
    let streams = ordered_streams(source, MediaStreamType::Audio);

    if let Some(index) = source.default_audio_stream_index {
        if streams.iter().any(|s| s.index == index) {
            return Some(index);
        }
    }

    streams
        .iter()
        .find(|s| s.is_default)
        .or_else(|| streams.first())
        .map(|s| s.index)
}

/// Subtitle stream to show when the user made no choice; `-1` means off
pub fn default_subtitle_index(source: &MediaSourceInfo) -> i32 {
    let streams = ordered_streams(source, MediaStreamType::Subtitle);

    if let Some(index) = source.default_subtitle_stream_index {
        if index == StreamSelection::SUBTITLES_OFF || streams.iter().any(|s| s.index == index) {
            return index;
        }
    }

    streams
        .iter()
        .find(|s| s.is_default || s.is_forced)
        .map(|s| s.index)
        .unwrap_or(StreamSelection::SUBTITLES_OFF)
}

/// Fill unset indices from the source defaults
pub fn resolve_selection(requested: StreamSelection, source: &MediaSourceInfo) -> StreamSelection {
    StreamSelection {
        audio: requested.audio.or_else(|| default_audio_index(source)),
        subtitle: requested
            .subtitle
            .or_else(|| Some(default_subtitle_index(source))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(index: i32, kind: MediaStreamType) -> MediaStream {
        MediaStream {
            index,
            stream_type: kind,
            codec: None,
            language: None,
            display_title: None,
            is_default: false,
            is_forced: false,
            is_external: false,
            channels: None,
        }
    }

    fn source(streams: Vec<MediaStream>) -> MediaSourceInfo {
        MediaSourceInfo {
            id: "src".into(),
            media_streams: streams,
            ..Default::default()
        }
    }

    #[test]
    fn explicit_selection_passes_through() {
        let mut src = source(vec![stream(1, MediaStreamType::Audio)]);
        src.default_audio_stream_index = Some(1);
        let picked = resolve_selection(StreamSelection::new(Some(7), Some(-1)), &src);
        assert_eq!(picked, StreamSelection::new(Some(7), Some(-1)));
    }

    #[test]
    fn source_default_index_wins() {
        let mut flagged = stream(2, MediaStreamType::Audio);
        flagged.is_default = true;
        let mut src = source(vec![stream(1, MediaStreamType::Audio), flagged, stream(3, MediaStreamType::Audio)]);
        src.default_audio_stream_index = Some(3);
        assert_eq!(default_audio_index(&src), Some(3));
    }

    #[test]
    fn default_flag_beats_first_stream() {
        let mut flagged = stream(2, MediaStreamType::Audio);
        flagged.is_default = true;
        let src = source(vec![stream(1, MediaStreamType::Audio), flagged]);
        assert_eq!(default_audio_index(&src), Some(2));
    }

    #[test]
    fn stale_default_index_is_ignored() {
        let mut src = source(vec![stream(1, MediaStreamType::Audio)]);
        src.default_audio_stream_index = Some(9);
        assert_eq!(default_audio_index(&src), Some(1));
    }

    #[test]
    fn subtitles_default_off() {
        let src = source(vec![stream(3, MediaStreamType::Subtitle)]);
        assert_eq!(default_subtitle_index(&src), -1);
    }

    #[test]
    fn forced_subtitles_selected() {
        let mut forced = stream(4, MediaStreamType::Subtitle);
        forced.is_forced = true;
        let src = source(vec![stream(3, MediaStreamType::Subtitle), forced]);
        assert_eq!(default_subtitle_index(&src), 4);
    }

    #[test]
    fn external_streams_sort_last() {
        let mut external = stream(0, MediaStreamType::Subtitle);
        external.is_external = true;
        let src = source(vec![external, stream(5, MediaStreamType::Subtitle)]);
        let order: Vec<i32> = ordered_streams(&src, MediaStreamType::Subtitle)
            .iter()
            .map(|s| s.index)
            .collect();
        assert_eq!(order, vec![5, 0]);
    }
}
