//! Completion Detector: decides when a remote scan has really finished by
//! polling the dashboard summary. It is the only thing allowed to end a
//! progress simulation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ScanTimings;
use crate::error::Result;
use crate::gateway::{PlatformScanRequest, ScanGateway};
use crate::jobs::{JobHandle, JobState};
use crate::models::Period;
use crate::progress::{CurveProgress, ProgressModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSignal {
    Arrived,
    TimedOut,
    Cancelled,
}

pub type ProbeFuture = Pin<Box<dyn Future<Output = Result<bool>> + Send>>;

/// Polls `GET /api/dashboard` until the summary carries prompts.
pub fn dashboard_probe(
    gateway: Arc<dyn ScanGateway>,
    user_id: String,
    company: Option<String>,
) -> impl FnMut() -> ProbeFuture + Send {
    move || -> ProbeFuture {
        let gateway = gateway.clone();
        let user_id = user_id.clone();
        let company = company.clone();
        Box::pin(async move {
            let snapshot = gateway
                .fetch_dashboard(&user_id, Period::Quarter, company.as_deref())
                .await?;
            Ok(snapshot.has_scan_data())
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionDetector {
    pub poll_interval: Duration,
    pub hard_timeout: Duration,
}

impl CompletionDetector {
    pub fn new(poll_interval: Duration, hard_timeout: Duration) -> Self {
        Self {
            poll_interval,
            hard_timeout,
        }
    }

    pub fn from_timings(timings: &ScanTimings) -> Self {
        Self::new(timings.poll_interval(), timings.hard_timeout())
    }

    pub async fn run<F, Fut>(&self, mut probe: F, cancel: CancellationToken) -> CompletionSignal
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<bool>> + Send,
    {
        let deadline = sleep(self.hard_timeout);
        tokio::pin!(deadline);
        let mut poll = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Completion polling cancelled");
                    return CompletionSignal::Cancelled;
                }
                _ = &mut deadline => {
                    // One last refresh so whatever landed is picked up on the next view.
                    match probe().await {
                        Ok(true) => info!("Scan data present at hard timeout"),
                        Ok(false) => warn!("Scan did not finish within {:?}", self.hard_timeout),
                        Err(e) => warn!("Final refresh failed: {}", e),
                    }
                    return CompletionSignal::TimedOut;
                }
                _ = poll.tick() => {
                    match probe().await {
                        Ok(true) => {
                            info!("Scan data arrived");
                            return CompletionSignal::Arrived;
                        }
                        Ok(false) => debug!("Scan still running"),
                        Err(e) => warn!("Completion poll failed, retrying: {}", e),
                    }
                }
            }
        }
    }
}

/// Drives a progress model and the detector side by side. The display ticker
/// only learns about completion through the one-shot signal.
pub async fn watch_scan<M, F, Fut>(
    detector: CompletionDetector,
    display_tick: Duration,
    mut model: M,
    probe: F,
    job: &JobHandle,
) -> CompletionSignal
where
    M: ProgressModel,
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<bool>> + Send,
{
    let (signal_tx, mut signal_rx) = oneshot::channel();
    let cancel = job.token();

    let detect = async move {
        let signal = detector.run(probe, cancel).await;
        let _ = signal_tx.send(signal);
    };

    let display = async {
        model.start();
        job.apply_view(&model.view());
        let mut ticker = interval_at(Instant::now() + display_tick, display_tick);
        loop {
            tokio::select! {
                signal = &mut signal_rx => {
                    return signal.unwrap_or(CompletionSignal::Cancelled);
                }
                _ = ticker.tick() => {
                    model.tick(display_tick);
                    job.apply_view(&model.view());
                }
            }
        }
    };

    let (_, signal) = tokio::join!(detect, display);

    match signal {
        CompletionSignal::Arrived => {
            model.complete();
            job.apply_view(&model.view());
            job.finish(JobState::Completed, Some("Scan complete".to_string()));
        }
        CompletionSignal::TimedOut => {
            model.time_out();
            job.apply_view(&model.view());
            job.finish(
                JobState::TimedOut,
                Some("The scan is taking longer than expected; results appear once it finishes".to_string()),
            );
        }
        CompletionSignal::Cancelled => {}
    }
    signal
}

/// Triggers a ChatGPT scan and watches for its results at the same time.
/// A rejected trigger fails the job and stops the watch.
pub async fn run_platform_scan(
    gateway: Arc<dyn ScanGateway>,
    timings: &ScanTimings,
    user_id: &str,
    request: &PlatformScanRequest,
    job: &JobHandle,
) -> CompletionSignal {
    let trigger = async {
        if let Err(e) = gateway.scan_chatgpt(user_id, request).await {
            warn!(company = %request.company_name, "Scan request failed: {}", e);
            job.finish(JobState::Failed, Some(e.to_string()));
            job.token().cancel();
        }
    };
    let watch = watch_scan(
        CompletionDetector::from_timings(timings),
        timings.display_tick(),
        CurveProgress::new(request.prompts.len()),
        dashboard_probe(
            gateway.clone(),
            user_id.to_string(),
            Some(request.company_name.clone()),
        ),
        job,
    );

    let (_, signal) = tokio::join!(trigger, watch);
    signal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::FakeGateway;
    use crate::jobs::JobKind;
    use crate::models::{DashboardSnapshot, Visibility};

    fn with_data() -> DashboardSnapshot {
        DashboardSnapshot {
            visibility: Visibility {
                total_prompts: 10,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn detector() -> CompletionDetector {
        CompletionDetector::new(Duration::from_secs(15), Duration::from_secs(180))
    }

    #[tokio::test(start_paused = true)]
    async fn arrives_once_summary_has_prompts() {
        let fake = Arc::new(FakeGateway::new().with_dashboards(vec![
            Some(DashboardSnapshot::default()),
            None,
            Some(with_data()),
        ]));
        let started = Instant::now();

        let signal = detector()
            .run(dashboard_probe(fake.clone(), "u1".into(), None), CancellationToken::new())
            .await;

        assert_eq!(signal, CompletionSignal::Arrived);
        assert_eq!(fake.count("fetch_dashboard"), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_at_hard_timeout_after_final_refresh() {
        let fake = Arc::new(FakeGateway::new().with_dashboards(vec![Some(DashboardSnapshot::default())]));
        let started = Instant::now();

        let signal = detector()
            .run(dashboard_probe(fake.clone(), "u1".into(), None), CancellationToken::new())
            .await;

        assert_eq!(signal, CompletionSignal::TimedOut);
        assert_eq!(started.elapsed(), Duration::from_secs(180));
        assert!(fake.count("fetch_dashboard") >= 12);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let fake = Arc::new(FakeGateway::new());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(20)).await;
            trigger.cancel();
        });

        let signal = detector()
            .run(dashboard_probe(fake.clone(), "u1".into(), None), cancel)
            .await;

        assert_eq!(signal, CompletionSignal::Cancelled);
        assert_eq!(fake.count("fetch_dashboard"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_completes_progress_on_arrival() {
        let fake = Arc::new(FakeGateway::new().with_dashboards(vec![
            Some(DashboardSnapshot::default()),
            Some(with_data()),
        ]));
        let job = JobHandle::detached(JobKind::Scan, "acme");

        let signal = watch_scan(
            detector(),
            Duration::from_secs(1),
            CurveProgress::new(10),
            dashboard_probe(fake, "u1".into(), Some("Acme".into())),
            &job,
        )
        .await;

        assert_eq!(signal, CompletionSignal::Arrived);
        let snapshot = job.snapshot();
        assert_eq!(snapshot.state, JobState::Completed);
        assert_eq!(snapshot.percent, 100);
        assert!(snapshot.elapsed_secs >= 29);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_times_out_without_reaching_100() {
        let fake = Arc::new(FakeGateway::new());
        let job = JobHandle::detached(JobKind::Scan, "acme");

        let signal = watch_scan(
            detector(),
            Duration::from_secs(1),
            CurveProgress::new(10),
            dashboard_probe(fake, "u1".into(), None),
            &job,
        )
        .await;

        assert_eq!(signal, CompletionSignal::TimedOut);
        let snapshot = job.snapshot();
        assert_eq!(snapshot.state, JobState::TimedOut);
        assert!(snapshot.percent < 100);
        assert!(snapshot.percent > 50);
    }

    fn scan_request() -> PlatformScanRequest {
        PlatformScanRequest {
            company_name: "Acme".to_string(),
            website: Some("https://acme.nl".to_string()),
            prompts: vec!["a".to_string(), "b".to_string()],
            service_area: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn platform_scan_triggers_then_detects() {
        let fake = Arc::new(FakeGateway::new().with_dashboards(vec![Some(with_data())]));
        let job = JobHandle::detached(JobKind::Scan, "acme");

        let signal = run_platform_scan(fake.clone(), &ScanTimings::default(), "u1", &scan_request(), &job).await;

        assert_eq!(signal, CompletionSignal::Arrived);
        assert_eq!(fake.calls(), vec!["scan_chatgpt:Acme", "fetch_dashboard"]);
        assert_eq!(job.snapshot().state, JobState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_scan_fails_job_and_stops_polling() {
        let fake = Arc::new(FakeGateway::new().fail("scan_chatgpt"));
        let job = JobHandle::detached(JobKind::Scan, "acme");

        let signal = run_platform_scan(fake.clone(), &ScanTimings::default(), "u1", &scan_request(), &job).await;

        assert_eq!(signal, CompletionSignal::Cancelled);
        assert_eq!(fake.count("fetch_dashboard"), 0);
        let snapshot = job.snapshot();
        assert_eq!(snapshot.state, JobState::Failed);
        assert!(snapshot.message.unwrap().contains("scan_chatgpt unavailable"));
    }
}
