//! Bitrate probe
//!
//! Downloads a fixed-size payload from the server's bitrate test endpoint
//! under a hard deadline and turns the observed throughput into a streaming
//! ceiling for negotiation. Hitting the deadline is a normal way for the probe
//! to finish: whatever arrived by then is the measurement.

use crate::{api::MediaServerApi, config::SessionConfig, Result};
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

/// Outcome of one probe run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    /// Bytes received before completion or deadline
    pub bytes_read: u64,
    /// Wall time from request to last byte
    pub elapsed: Duration,
    /// Deadline cut the transfer short
    pub timed_out: bool,
    /// Safety-adjusted estimate; `None` when nothing was measured
    pub bitrate: Option<u64>,
}

/// `bytes * 8 / seconds * safety_factor`
///
/// Returns `None` for the degenerate cases (no bytes or no elapsed time) so
/// callers never divide by zero or offer a zero ceiling.
pub fn estimate_bitrate(bytes: u64, elapsed: Duration, safety_factor: f64) -> Option<u64> {
    let secs = elapsed.as_secs_f64();
    if bytes == 0 || secs <= 0.0 {
        return None;
    }
    let bps = (bytes as f64 * 8.0 / secs * safety_factor).round();
    (bps >= 1.0).then_some(bps as u64)
}

/// Runs the timed download against the server
pub struct BitrateProber {
    api: Arc<dyn MediaServerApi>,
    size_bytes: u64,
    timeout: Duration,
    safety_factor: f64,
    floor: u64,
}

impl BitrateProber {
    pub fn new(api: Arc<dyn MediaServerApi>, config: &SessionConfig) -> Self {
        Self {
            api,
            size_bytes: config.probe_size_bytes,
            timeout: config.probe_timeout(),
            safety_factor: config.probe_safety_factor,
            floor: config.min_bitrate_floor,
        }
    }

    /// Measure throughput; only a failure to open the stream is an error
    #[instrument(skip(self), fields(size = self.size_bytes))]
    pub async fn measure(&self) -> Result<ProbeReport> {
        let start = Instant::now();
        let deadline = start + self.timeout;

        let mut stream = match timeout_at(deadline, self.api.bitrate_test(self.size_bytes)).await {
            Ok(stream) => stream?,
            Err(_) => {
                debug!("Probe deadline reached before the payload started");
                return Ok(self.report(0, start.elapsed(), true));
            }
        };

        let mut bytes_read: u64 = 0;
        let mut timed_out = false;

        // Frames arrive in whatever sizes the transport delivers; anything past
        // the requested payload is not counted
        while bytes_read < self.size_bytes {
            match timeout_at(deadline, stream.next()).await {
                Ok(Some(Ok(chunk))) => {
                    let remaining = self.size_bytes - bytes_read;
                    bytes_read += (chunk.len() as u64).min(remaining);
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, bytes_read, "Probe transfer failed; using partial data");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        let report = self.report(bytes_read, start.elapsed(), timed_out);
        info!(
            bytes = report.bytes_read,
            elapsed_ms = report.elapsed.as_millis(),
            timed_out = report.timed_out,
            bitrate = ?report.bitrate,
            "Bitrate probe finished"
        );
        Ok(report)
    }

    /// Ceiling for negotiation, never below the configured floor
    pub async fn probe_ceiling(&self) -> u64 {
        match self.measure().await {
            Ok(report) => self.clamp(report.bitrate),
            Err(e) => {
                warn!(error = %e, floor = self.floor, "Bitrate probe could not start; using floor");
                self.floor
            }
        }
    }

    /// Apply the floor to a raw estimate
    pub fn clamp(&self, bitrate: Option<u64>) -> u64 {
        bitrate.unwrap_or(0).max(self.floor)
    }

    fn report(&self, bytes_read: u64, elapsed: Duration, timed_out: bool) -> ProbeReport {
        ProbeReport {
            bytes_read,
            elapsed,
            timed_out,
            bitrate: estimate_bitrate(bytes_read, elapsed, self.safety_factor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::*;
    use crate::types::ItemId;
    use crate::Error;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::stream;

    /// Serves `chunks` chunks of `chunk_len` bytes, one every `every`
    struct DripApi {
        chunk_len: usize,
        chunks: usize,
        every: Duration,
        fail_open: bool,
    }

    #[async_trait]
    impl MediaServerApi for DripApi {
        async fn playback_info(&self, _: &ItemId, _: &PlaybackInfoRequest) -> Result<PlaybackInfoResponse> {
            unreachable!()
        }

        async fn bitrate_test(&self, _size: u64) -> Result<ByteStream> {
            if self.fail_open {
                return Err(Error::ConnectionTimeout);
            }
            let (len, every) = (self.chunk_len, self.every);
            let s = stream::iter(0..self.chunks).then(move |_| async move {
                tokio::time::sleep(every).await;
                Ok(Bytes::from(vec![0u8; len]))
            });
            Ok(s.boxed())
        }

        async fn report_started(&self, _: &PlaybackStartInfo) -> Result<()> {
            Ok(())
        }

        async fn report_progress(&self, _: &PlaybackProgressInfo) -> Result<()> {
            Ok(())
        }

        async fn report_stopped(&self, _: &PlaybackStopInfo) -> Result<()> {
            Ok(())
        }
    }

    fn prober(api: DripApi) -> BitrateProber {
        BitrateProber::new(Arc::new(api), &SessionConfig::default())
    }

    #[test]
    fn estimate_matches_formula() {
        // 2,000,000 bytes in 2.0 s with the 0.8 safety factor
        assert_eq!(
            estimate_bitrate(2_000_000, Duration::from_secs(2), 0.8),
            Some(6_400_000)
        );
    }

    #[test]
    fn degenerate_estimates() {
        assert_eq!(estimate_bitrate(0, Duration::from_secs(2), 0.8), None);
        assert_eq!(estimate_bitrate(1024, Duration::ZERO, 0.8), None);
    }

    #[tokio::test(start_paused = true)]
    async fn full_payload_before_deadline() {
        let p = prober(DripApi {
            chunk_len: 256 * 1024,
            chunks: 4,
            every: Duration::from_millis(250),
            fail_open: false,
        });

        let report = p.measure().await.unwrap();
        assert_eq!(report.bytes_read, 1024 * 1024);
        assert!(!report.timed_out);
        assert_eq!(report.elapsed, Duration::from_secs(1));
        assert_eq!(report.bitrate, Some(6_710_886));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_frame_counts_only_the_payload() {
        let p = prober(DripApi {
            chunk_len: 3 * 1024 * 1024,
            chunks: 1,
            every: Duration::from_millis(500),
            fail_open: false,
        });

        let report = p.measure().await.unwrap();
        assert_eq!(report.bytes_read, 1024 * 1024);
        assert!(!report.timed_out);
        assert_eq!(report.elapsed, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_keeps_partial_data() {
        let p = prober(DripApi {
            chunk_len: 1024,
            chunks: 10_000,
            every: Duration::from_millis(100),
            fail_open: false,
        });

        let report = p.measure().await.unwrap();
        assert!(report.timed_out);
        assert!(report.bytes_read > 0);
        assert!(report.bytes_read < 1024 * 1024);
        assert!(report.elapsed <= Duration::from_secs(5) + Duration::from_millis(1));
        assert!(report.bitrate.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_never_below_floor() {
        let starved = prober(DripApi {
            chunk_len: 1,
            chunks: 0,
            every: Duration::from_millis(1),
            fail_open: false,
        });
        assert_eq!(starved.probe_ceiling().await, 1_000_000);

        let broken = prober(DripApi {
            chunk_len: 1,
            chunks: 1,
            every: Duration::from_millis(1),
            fail_open: true,
        });
        assert_eq!(broken.probe_ceiling().await, 1_000_000);
    }
}
