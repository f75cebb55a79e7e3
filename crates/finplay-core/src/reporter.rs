//! Session reporting
//!
//! Every report for one playback goes through a single background worker
//! that posts them in submission order. Callers get a [`ReportTicket`] back
//! immediately; the playback path never waits on it. A failed report is
//! logged and dropped, it is not retried.

use crate::{
    api::{MediaServerApi, PlaybackProgressInfo, PlaybackStartInfo, PlaybackStopInfo},
    types::PlaySessionId,
    Error, Result,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn, Instrument};

#[derive(Debug)]
enum Report {
    Started(PlaybackStartInfo),
    Progress(PlaybackProgressInfo),
    Stopped(PlaybackStopInfo),
}

impl Report {
    fn kind(&self) -> &'static str {
        match self {
            Report::Started(_) => "started",
            Report::Progress(_) => "progress",
            Report::Stopped(_) => "stopped",
        }
    }
}

struct Job {
    report: Report,
    done: oneshot::Sender<Result<()>>,
}

/// Outcome of one queued report
#[derive(Debug)]
pub struct ReportTicket {
    rx: oneshot::Receiver<Result<()>>,
    kind: &'static str,
}

impl ReportTicket {
    fn closed(kind: &'static str) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(Error::ReporterClosed(kind)));
        Self { rx, kind }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Wait for the server's answer to this report
    pub async fn outcome(self) -> Result<()> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::ReporterClosed(self.kind)),
        }
    }
}

/// Per-session FIFO of start/progress/stop reports
pub struct SessionReporter {
    play_session_id: PlaySessionId,
    tx: Option<mpsc::UnboundedSender<Job>>,
    started: bool,
    worker: JoinHandle<()>,
}

impl SessionReporter {
    /// Spawn the worker for one play session
    pub fn new(api: Arc<dyn MediaServerApi>, play_session_id: PlaySessionId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let span = tracing::debug_span!("reporter", play_session_id = %play_session_id);
        let worker = tokio::spawn(
            async move {
                while let Some(job) = rx.recv().await {
                    let kind = job.report.kind();
                    let result = match &job.report {
                        Report::Started(info) => api.report_started(info).await,
                        Report::Progress(info) => api.report_progress(info).await,
                        Report::Stopped(info) => api.report_stopped(info).await,
                    };

                    match &result {
                        Ok(()) => debug!(kind, "Report delivered"),
                        Err(e) => warn!(kind, error = %e, code = e.error_code(), "Report failed"),
                    }
                    let _ = job.done.send(result);
                }
                debug!("Reporter worker finished");
            }
            .instrument(span),
        );

        Self {
            play_session_id,
            tx: Some(tx),
            started: false,
            worker,
        }
    }

    pub fn play_session_id(&self) -> &PlaySessionId {
        &self.play_session_id
    }

    /// True once `stopped` has been queued
    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    pub fn started(&mut self, info: PlaybackStartInfo) -> ReportTicket {
        if self.started {
            warn!(play_session_id = %self.play_session_id, "Duplicate started report dropped");
            return ReportTicket::closed("started");
        }
        self.started = true;
        self.enqueue(Report::Started(info))
    }

    pub fn progress(&mut self, info: PlaybackProgressInfo) -> ReportTicket {
        if !self.started {
            warn!(play_session_id = %self.play_session_id, "Progress before started dropped");
            return ReportTicket::closed("progress");
        }
        self.enqueue(Report::Progress(info))
    }

    /// Queue the final report and close the reporter
    pub fn stopped(&mut self, info: PlaybackStopInfo) -> ReportTicket {
        let ticket = self.enqueue(Report::Stopped(info));
        self.tx = None;
        ticket
    }

    /// Close without a final report and wait for queued reports to finish
    #[instrument(skip(self), fields(play_session_id = %self.play_session_id))]
    pub async fn flush(mut self) {
        self.tx = None;
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Reporter worker panicked");
        }
    }

    fn enqueue(&mut self, report: Report) -> ReportTicket {
        let kind = report.kind();
        let Some(tx) = &self.tx else {
            warn!(play_session_id = %self.play_session_id, kind, "Reporter closed; report dropped");
            return ReportTicket::closed(kind);
        };

        let (done, rx) = oneshot::channel();
        if tx.send(Job { report, done }).is_err() {
            warn!(play_session_id = %self.play_session_id, kind, "Reporter worker gone; report dropped");
            return ReportTicket::closed(kind);
        }
        ReportTicket { rx, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::*;
    use crate::types::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
        fail_progress: bool,
    }

    #[async_trait]
    impl MediaServerApi for Recorder {
        async fn playback_info(&self, _: &ItemId, _: &PlaybackInfoRequest) -> Result<PlaybackInfoResponse> {
            unreachable!()
        }

        async fn bitrate_test(&self, _: u64) -> Result<ByteStream> {
            unreachable!()
        }

        async fn report_started(&self, _: &PlaybackStartInfo) -> Result<()> {
            // slow first report must not let later ones overtake it
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.calls.lock().unwrap().push("started");
            Ok(())
        }

        async fn report_progress(&self, _: &PlaybackProgressInfo) -> Result<()> {
            self.calls.lock().unwrap().push("progress");
            if self.fail_progress {
                return Err(Error::ReportRejected {
                    endpoint: "/Sessions/Playing/Progress",
                    status: 500,
                });
            }
            Ok(())
        }

        async fn report_stopped(&self, _: &PlaybackStopInfo) -> Result<()> {
            self.calls.lock().unwrap().push("stopped");
            Ok(())
        }
    }

    fn start() -> PlaybackStartInfo {
        PlaybackStartInfo {
            item_id: ItemId::new("item"),
            media_source_id: MediaSourceId::new("src"),
            play_session_id: PlaySessionId::new("ps"),
            live_stream_id: None,
            audio_stream_index: Some(1),
            subtitle_stream_index: Some(-1),
            position_ticks: Ticks::ZERO,
            is_paused: false,
            can_seek: true,
            play_method: DeliveryMode::DirectPlay,
        }
    }

    fn progress() -> PlaybackProgressInfo {
        PlaybackProgressInfo {
            item_id: ItemId::new("item"),
            media_source_id: MediaSourceId::new("src"),
            play_session_id: PlaySessionId::new("ps"),
            live_stream_id: None,
            audio_stream_index: Some(1),
            subtitle_stream_index: Some(-1),
            position_ticks: Ticks(10),
            is_paused: false,
            can_seek: true,
            play_method: DeliveryMode::DirectPlay,
            event_name: ProgressEvent::TimeUpdate,
        }
    }

    fn stop() -> PlaybackStopInfo {
        PlaybackStopInfo {
            item_id: ItemId::new("item"),
            media_source_id: MediaSourceId::new("src"),
            play_session_id: PlaySessionId::new("ps"),
            live_stream_id: None,
            position_ticks: Ticks(20),
            failed: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reports_delivered_in_order() {
        let api = Arc::new(Recorder::default());
        let mut reporter = SessionReporter::new(api.clone(), PlaySessionId::new("ps"));

        reporter.started(start());
        reporter.progress(progress());
        let last = reporter.stopped(stop());
        last.outcome().await.unwrap();

        assert_eq!(*api.calls.lock().unwrap(), vec!["started", "progress", "stopped"]);
    }

    #[tokio::test]
    async fn closed_after_stopped() {
        let api = Arc::new(Recorder::default());
        let mut reporter = SessionReporter::new(api.clone(), PlaySessionId::new("ps"));
        reporter.started(start());
        reporter.stopped(stop());
        assert!(reporter.is_closed());

        let late = reporter.progress(progress());
        assert!(matches!(late.outcome().await, Err(Error::ReporterClosed("progress"))));

        reporter.flush().await;
        assert_eq!(*api.calls.lock().unwrap(), vec!["started", "stopped"]);
    }

    #[tokio::test]
    async fn failures_are_visible_but_not_retried() {
        let api = Arc::new(Recorder {
            fail_progress: true,
            ..Default::default()
        });
        let mut reporter = SessionReporter::new(api.clone(), PlaySessionId::new("ps"));
        reporter.started(start());
        let ticket = reporter.progress(progress());
        assert!(matches!(
            ticket.outcome().await,
            Err(Error::ReportRejected { status: 500, .. })
        ));

        reporter.stopped(stop()).outcome().await.unwrap();
        assert_eq!(*api.calls.lock().unwrap(), vec!["started", "progress", "stopped"]);
    }

    #[tokio::test]
    async fn progress_requires_started() {
        let api = Arc::new(Recorder::default());
        let mut reporter = SessionReporter::new(api.clone(), PlaySessionId::new("ps"));
        let early = reporter.progress(progress());
        assert!(early.outcome().await.is_err());
        reporter.flush().await;
        assert!(api.calls.lock().unwrap().is_empty());
    }
}
