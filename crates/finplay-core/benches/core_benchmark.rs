//! Benchmarks for the synchronous finplay-core paths
//!
//! Run with: cargo bench -p finplay-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use url::Url;

use finplay_core::api::{MediaSourceInfo, MediaStream, MediaStreamType};
use finplay_core::manifest::parse_master;
use finplay_core::negotiator::{select_mode, static_stream_url, transcoding_url};
use finplay_core::probe::estimate_bitrate;
use finplay_core::profile::{build_profile, DecoderInventory};
use finplay_core::streams::resolve_selection;
use finplay_core::{ItemId, ServerContext, StreamSelection};

// ============================================================================
// Helpers
// ============================================================================

fn context() -> ServerContext {
    ServerContext::new(Url::parse("https://media.example.com/jellyfin").unwrap(), "token", "bench-device")
}

fn source(stream_count: usize) -> MediaSourceInfo {
    let media_streams = (0..stream_count)
        .map(|i| MediaStream {
            index: i as i32,
            stream_type: if i % 3 == 0 {
                MediaStreamType::Subtitle
            } else {
                MediaStreamType::Audio
            },
            codec: Some("aac".to_string()),
            language: None,
            display_title: None,
            is_default: i == stream_count / 2,
            is_forced: false,
            is_external: i % 5 == 0,
            channels: Some(2),
        })
        .collect();

    MediaSourceInfo {
        id: "0123456789abcdef".to_string(),
        container: Some("mkv,webm".to_string()),
        supports_direct_stream: true,
        supports_transcoding: true,
        transcoding_url: Some(
            "/videos/abc/master.m3u8?MediaSourceId=0123456789abcdef&VideoCodec=h264&AudioCodec=aac"
                .to_string(),
        ),
        transcoding_sub_protocol: Some("hls".to_string()),
        e_tag: Some("f00dfeed".to_string()),
        media_streams,
        ..Default::default()
    }
}

/// Master playlist with N variants
fn generate_hls_master(variant_count: usize) -> String {
    let mut m3u8 = String::from("#EXTM3U\n");
    let bandwidths = [400_000u64, 800_000, 1_400_000, 2_800_000, 5_000_000, 7_500_000, 15_000_000];
    let resolutions = ["426x240", "640x360", "854x480", "1280x720", "1920x1080", "1920x1080", "3840x2160"];

    for i in 0..variant_count {
        let idx = i % bandwidths.len();
        m3u8.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={},CODECS=\"avc1.640028,mp4a.40.2\"\n",
            bandwidths[idx], resolutions[idx]
        ));
        m3u8.push_str(&format!("main{}.m3u8?api_key=token\n", i));
    }

    m3u8
}

// ============================================================================
// Profile
// ============================================================================

fn bench_profile(c: &mut Criterion) {
    let mut group = c.benchmark_group("Device Profile");

    let full = DecoderInventory::new(
        ["h264", "hevc", "vp9", "av1"],
        ["flac", "aac", "mp3", "ac3", "eac3", "mp2", "dca", "truehd"],
    );
    let minimal = DecoderInventory::new(["h264"], ["aac"]);

    group.bench_function("build_full", |b| {
        b.iter(|| black_box(build_profile(black_box(&full), 6)))
    });
    group.bench_function("build_minimal", |b| {
        b.iter(|| black_box(build_profile(black_box(&minimal), 2)))
    });

    let profile = build_profile(&full, 6);
    group.bench_function("with_streaming_ceiling", |b| {
        b.iter(|| black_box(profile.with_streaming_ceiling(black_box(6_400_000))))
    });
    group.bench_function("serialize", |b| {
        b.iter(|| black_box(serde_json::to_vec(&profile).unwrap()))
    });

    group.finish();
}

// ============================================================================
// Negotiation
// ============================================================================

fn bench_negotiation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Negotiation");
    let ctx = context();
    let item = ItemId::new("abc");
    let src = source(12);

    group.bench_function("select_mode", |b| b.iter(|| black_box(select_mode(black_box(&src)))));
    group.bench_function("static_stream_url", |b| {
        b.iter(|| black_box(static_stream_url(&ctx, &item, black_box(&src)).unwrap()))
    });
    group.bench_function("transcoding_url", |b| {
        b.iter(|| black_box(transcoding_url(&ctx, black_box(&src)).unwrap()))
    });

    for &streams in &[4, 16, 64] {
        let src = source(streams);
        group.bench_with_input(
            BenchmarkId::new("resolve_selection", format!("{}_streams", streams)),
            &src,
            |b, src| b.iter(|| black_box(resolve_selection(StreamSelection::default(), src))),
        );
    }

    group.finish();
}

// ============================================================================
// Manifest + probe math
// ============================================================================

fn bench_manifest(c: &mut Criterion) {
    let mut group = c.benchmark_group("HLS Master Parsing");
    let base = Url::parse("https://media.example.com/videos/abc/master.m3u8?api_key=token").unwrap();

    for &variant_count in &[3, 7, 20] {
        let manifest = generate_hls_master(variant_count);
        group.bench_with_input(
            BenchmarkId::new("parse_master", format!("{}_variants", variant_count)),
            &manifest,
            |b, manifest| b.iter(|| black_box(parse_master(black_box(manifest.as_bytes()), &base).unwrap())),
        );
    }

    group.finish();
}

fn bench_probe_math(c: &mut Criterion) {
    c.bench_function("estimate_bitrate", |b| {
        b.iter(|| {
            black_box(estimate_bitrate(
                black_box(1_048_576),
                black_box(Duration::from_millis(1_337)),
                0.8,
            ))
        })
    });
}

criterion_group!(profile_benches, bench_profile);
criterion_group!(negotiation_benches, bench_negotiation);
criterion_group!(manifest_benches, bench_manifest, bench_probe_math);

criterion_main!(profile_benches, negotiation_benches, manifest_benches);
