//! Worker behaviour of the build orchestrator, driven through a fake runner.

use async_trait::async_trait;
use romforge_config::{LogSettings, NotifySettings, SourceSettings};
use romforge_core::runner::{JobOutcome, JobRunner, Stage};
use romforge_core::{ChannelId, Error, Job, JobRequest, RequesterId};
use romforge_notify::testing::RecordingTransport;
use romforge_notify::{LogAggregator, Notifier};
use romforge_scheduler::{BuildOrchestrator, WorkerEvent};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, broadcast};

#[derive(Debug, Clone)]
struct Run {
    path: String,
    started: Instant,
    finished: Instant,
}

#[derive(Default)]
struct FakeRunner {
    /// When set, every job waits for a permit before finishing.
    gate: Option<Arc<Semaphore>>,
    delay: Duration,
    fail_paths: Vec<&'static str>,
    panic_paths: Vec<&'static str>,
    runs: Mutex<Vec<Run>>,
}

impl FakeRunner {
    fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let runner = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (runner, gate)
    }

    fn paths(&self) -> Vec<String> {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.path.clone())
            .collect()
    }
}

#[async_trait]
impl JobRunner for FakeRunner {
    async fn run(&self, job: Job) -> JobOutcome {
        let started = Instant::now();
        let path = job.device_path.to_string();

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panic_paths.contains(&path.as_str()) {
            panic!("runner blew up on {path}");
        }

        self.runs.lock().unwrap().push(Run {
            path: path.clone(),
            started,
            finished: Instant::now(),
        });

        if self.fail_paths.contains(&path.as_str()) {
            JobOutcome::Failed {
                stage: Stage::Fetch,
                message: "fatal: repository not found".into(),
            }
        } else {
            JobOutcome::Succeeded { artifacts: vec![] }
        }
    }
}

fn log_aggregator() -> LogAggregator {
    let notifier = Notifier::new(
        Arc::new(RecordingTransport::new()),
        NotifySettings::default(),
    );
    LogAggregator::new(notifier, LogSettings::default())
}

fn orchestrator(runner: Arc<FakeRunner>) -> BuildOrchestrator {
    BuildOrchestrator::new(runner, log_aggregator(), &SourceSettings::default())
}

fn request(requester: i64, path: &str) -> JobRequest {
    JobRequest {
        requester: RequesterId::new(requester),
        reply_to: ChannelId::new(requester),
        source_ref: "https://github.com/acme/device_tree".into(),
        device_path: path.into(),
        targets: vec!["recovery".into()],
    }
}

async fn next_event(events: &mut broadcast::Receiver<WorkerEvent>) -> WorkerEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for worker event")
        .expect("event channel closed")
}

async fn wait_idle(events: &mut broadcast::Receiver<WorkerEvent>) {
    loop {
        if let WorkerEvent::Idle { .. } = next_event(events).await {
            return;
        }
    }
}

#[tokio::test]
async fn test_second_job_stays_queued_until_first_completes() {
    let (runner, gate) = FakeRunner::gated();
    let runner = Arc::new(runner);
    let orchestrator = orchestrator(runner.clone());
    let mut events = orchestrator.subscribe();

    assert_eq!(orchestrator.submit(request(1, "vendor/a")).unwrap(), 1);
    assert!(matches!(
        next_event(&mut events).await,
        WorkerEvent::JobStarted { .. }
    ));
    assert_eq!(orchestrator.submit(request(2, "vendor/b")).unwrap(), 1);

    let queued = orchestrator.list_queue();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].device_path.as_str(), "vendor/b");
    assert_eq!(queued[0].requester, RequesterId::new(2));
    assert!(orchestrator.is_running());

    gate.add_permits(1);
    assert!(matches!(
        next_event(&mut events).await,
        WorkerEvent::JobFinished { success: true, .. }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        WorkerEvent::JobStarted { .. }
    ));
    assert!(orchestrator.list_queue().is_empty());

    gate.add_permits(1);
    wait_idle(&mut events).await;
    assert_eq!(runner.paths(), vec!["vendor/a", "vendor/b"]);
    assert!(!orchestrator.is_running());
}

#[tokio::test]
async fn test_pipelines_never_overlap() {
    let runner = Arc::new(FakeRunner {
        delay: Duration::from_millis(20),
        ..FakeRunner::default()
    });
    let orchestrator = orchestrator(runner.clone());
    let mut events = orchestrator.subscribe();

    orchestrator.submit(request(1, "vendor/a")).unwrap();
    orchestrator.submit(request(2, "vendor/b")).unwrap();
    orchestrator.submit(request(3, "vendor/c")).unwrap();
    wait_idle(&mut events).await;

    let runs = runner.runs.lock().unwrap().clone();
    assert_eq!(runs.len(), 3);
    for pair in runs.windows(2) {
        assert!(pair[0].finished <= pair[1].started);
    }
}

#[tokio::test]
async fn test_failed_job_does_not_stop_worker() {
    let runner = Arc::new(FakeRunner {
        fail_paths: vec!["vendor/a"],
        ..FakeRunner::default()
    });
    let orchestrator = orchestrator(runner.clone());
    let mut events = orchestrator.subscribe();

    orchestrator.submit(request(1, "vendor/a")).unwrap();
    orchestrator.submit(request(1, "vendor/b")).unwrap();

    let mut finished = Vec::new();
    loop {
        match next_event(&mut events).await {
            WorkerEvent::JobFinished { success, .. } => finished.push(success),
            WorkerEvent::Idle { .. } => break,
            WorkerEvent::JobStarted { .. } => {}
        }
    }
    assert_eq!(finished, vec![false, true]);
    assert_eq!(runner.paths(), vec!["vendor/a", "vendor/b"]);
}

#[tokio::test]
async fn test_panicking_runner_releases_worker() {
    let runner = Arc::new(FakeRunner {
        panic_paths: vec!["vendor/a"],
        ..FakeRunner::default()
    });
    let orchestrator = orchestrator(runner.clone());
    let mut events = orchestrator.subscribe();

    orchestrator.submit(request(1, "vendor/a")).unwrap();
    orchestrator.submit(request(1, "vendor/b")).unwrap();
    wait_idle(&mut events).await;

    assert_eq!(runner.paths(), vec!["vendor/b"]);
    assert!(!orchestrator.is_running());
}

#[tokio::test]
async fn test_invalid_submission_is_rejected_before_queueing() {
    let runner = Arc::new(FakeRunner::default());
    let orchestrator = orchestrator(runner.clone());

    let err = orchestrator.submit(request(1, "../../etc")).unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(orchestrator.queue_len(), 0);
    assert!(!orchestrator.is_running());
}

#[tokio::test]
async fn test_cancelled_job_is_never_run() {
    let (runner, gate) = FakeRunner::gated();
    let runner = Arc::new(runner);
    let orchestrator = orchestrator(runner.clone());
    let mut events = orchestrator.subscribe();

    orchestrator.submit(request(1, "vendor/a")).unwrap();
    next_event(&mut events).await;
    orchestrator.submit(request(2, "vendor/b")).unwrap();
    orchestrator.submit(request(3, "vendor/c")).unwrap();

    assert!(matches!(
        orchestrator.cancel(1, RequesterId::new(3)),
        Err(Error::NotOwner { position: 1 })
    ));
    orchestrator.cancel(1, RequesterId::new(2)).unwrap();

    gate.add_permits(2);
    wait_idle(&mut events).await;
    assert_eq!(runner.paths(), vec!["vendor/a", "vendor/c"]);
}

#[tokio::test]
async fn test_clear_leaves_running_job_alone() {
    let (runner, gate) = FakeRunner::gated();
    let runner = Arc::new(runner);
    let orchestrator = orchestrator(runner.clone());
    let mut events = orchestrator.subscribe();

    orchestrator.submit(request(1, "vendor/a")).unwrap();
    next_event(&mut events).await;
    orchestrator.submit(request(2, "vendor/b")).unwrap();
    orchestrator.submit(request(2, "vendor/c")).unwrap();

    assert_eq!(orchestrator.clear(), 2);
    assert!(orchestrator.list_queue().is_empty());

    gate.add_permits(1);
    wait_idle(&mut events).await;
    assert_eq!(runner.paths(), vec!["vendor/a"]);
}

#[tokio::test]
async fn test_reorder_changes_execution_order() {
    let (runner, gate) = FakeRunner::gated();
    let runner = Arc::new(runner);
    let orchestrator = orchestrator(runner.clone());
    let mut events = orchestrator.subscribe();

    orchestrator.submit(request(1, "vendor/a")).unwrap();
    next_event(&mut events).await;
    orchestrator.submit(request(1, "vendor/b")).unwrap();
    orchestrator.submit(request(1, "vendor/c")).unwrap();

    orchestrator.reorder(2, 1).unwrap();
    assert!(matches!(
        orchestrator.reorder(1, 3),
        Err(Error::OutOfRange { position: 3, len: 2 })
    ));

    gate.add_permits(3);
    wait_idle(&mut events).await;
    assert_eq!(runner.paths(), vec!["vendor/a", "vendor/c", "vendor/b"]);
}

#[tokio::test]
async fn test_submission_after_idle_starts_new_worker() {
    let runner = Arc::new(FakeRunner::default());
    let orchestrator = orchestrator(runner.clone());
    let mut events = orchestrator.subscribe();

    orchestrator.submit(request(1, "vendor/a")).unwrap();
    wait_idle(&mut events).await;
    orchestrator.submit(request(1, "vendor/b")).unwrap();
    wait_idle(&mut events).await;

    assert_eq!(runner.paths(), vec!["vendor/a", "vendor/b"]);
}

#[tokio::test]
async fn test_recent_logs_follow_running_job() {
    let logs = log_aggregator();
    let orchestrator = BuildOrchestrator::new(
        Arc::new(FakeRunner::default()),
        logs.clone(),
        &SourceSettings::default(),
    );
    assert_eq!(orchestrator.recent_logs(), None);

    logs.begin_job();
    logs.append("ninja: build started");
    assert_eq!(
        orchestrator.recent_logs(),
        Some(vec!["ninja: build started".to_string()])
    );

    logs.end_job();
    assert_eq!(orchestrator.recent_logs(), None);
}
