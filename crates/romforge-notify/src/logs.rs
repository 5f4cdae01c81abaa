//! Recent build output and periodic tail flushing.
//!
//! The pipeline appends lines as the toolchain produces them. A separate
//! [`TailFlusher`] task wakes once per flush interval and, if anything new
//! arrived, sends the last few lines to the requester. Bursts between two
//! ticks therefore collapse into a single message.

use crate::Notifier;
use crate::chunking::newest_chars;
use romforge_config::LogSettings;
use romforge_core::ChannelId;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Bounded FIFO of output lines; the oldest line is evicted first.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    /// Up to `n` most recent lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

struct LogState {
    buffer: LogBuffer,
    /// A job is currently executing.
    active: bool,
    /// Lines arrived since the last flush.
    pending: bool,
}

/// Output of the currently executing job.
#[derive(Clone)]
pub struct LogAggregator {
    state: Arc<Mutex<LogState>>,
    notifier: Notifier,
    settings: LogSettings,
}

impl LogAggregator {
    pub fn new(notifier: Notifier, settings: LogSettings) -> Self {
        let state = LogState {
            buffer: LogBuffer::new(settings.capacity),
            active: false,
            pending: false,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            notifier,
            settings,
        }
    }

    /// Start collecting for a new job, discarding the previous job's lines.
    pub fn begin_job(&self) {
        let mut state = self.lock();
        state.buffer.clear();
        state.active = true;
        state.pending = false;
    }

    pub fn end_job(&self) {
        let mut state = self.lock();
        state.active = false;
        state.pending = false;
    }

    /// [`begin_job`](Self::begin_job), with the matching `end_job` run when
    /// the returned scope is dropped, including during unwinding.
    pub fn job_scope(&self) -> JobScope {
        self.begin_job();
        JobScope {
            logs: self.clone(),
        }
    }

    pub fn append(&self, line: impl Into<String>) {
        let mut state = self.lock();
        state.buffer.push(line);
        state.pending = true;
    }

    /// The on-demand query: recent lines of the executing job, or `None` if
    /// no job is running or it has not produced output yet.
    pub fn recent(&self) -> Option<Vec<String>> {
        let state = self.lock();
        if !state.active || state.buffer.is_empty() {
            return None;
        }
        Some(state.buffer.tail(self.settings.query_lines))
    }

    pub fn tail(&self, n: usize) -> Vec<String> {
        self.lock().buffer.tail(n)
    }

    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().buffer.is_empty()
    }

    /// Start flushing tail snippets to `channel` once per flush interval.
    pub fn stream_to(&self, channel: ChannelId) -> TailFlusher {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let aggregator = self.clone();
        let period = self.settings.flush_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let Some(snippet) = aggregator.take_snippet() else {
                            continue;
                        };
                        debug!(channel = %channel, "Flushing log tail");
                        tokio::select! {
                            _ = aggregator.notifier.send_text(channel, snippet) => {}
                            _ = &mut stop_rx => break,
                        }
                    }
                }
            }
        });

        TailFlusher {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    fn take_snippet(&self) -> Option<String> {
        let mut state = self.lock();
        if !state.pending {
            return None;
        }
        state.pending = false;
        let lines = state.buffer.tail(self.settings.tail_lines);
        drop(state);
        Some(format_snippet(&lines, self.notifier.text_limit()))
    }

    // A panic while holding the lock cannot leave the buffer half-updated.
    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

const FENCE: &str = "```";

/// Render lines as a preformatted block of at most `max_chars` characters.
///
/// When the lines do not fit, the oldest output is dropped.
pub fn format_snippet(lines: &[String], max_chars: Option<usize>) -> String {
    let body = lines.join("\n");
    let body = match max_chars {
        Some(max) => newest_chars(&body, max.saturating_sub(2 * FENCE.len() + 2)),
        None => &body,
    };
    format!("{FENCE}\n{body}\n{FENCE}")
}

/// Marks the aggregator's job as finished when dropped.
#[must_use = "the job ends as soon as the scope is dropped"]
pub struct JobScope {
    logs: LogAggregator,
}

impl Drop for JobScope {
    fn drop(&mut self) {
        self.logs.end_job();
    }
}

/// Handle to a running flush task; dropping it stops the task.
pub struct TailFlusher {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TailFlusher {
    /// Stop flushing and wait for the task to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TailFlusher {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;
    use romforge_config::NotifySettings;
    use std::time::Duration;

    fn aggregator(
        capacity: usize,
        flush_interval: Duration,
    ) -> (LogAggregator, Arc<RecordingTransport>) {
        aggregator_on(RecordingTransport::new(), capacity, flush_interval)
    }

    fn aggregator_on(
        transport: RecordingTransport,
        capacity: usize,
        flush_interval: Duration,
    ) -> (LogAggregator, Arc<RecordingTransport>) {
        let transport = Arc::new(transport);
        let notifier = Notifier::new(transport.clone(), NotifySettings::default());
        let settings = LogSettings {
            capacity,
            tail_lines: 2,
            query_lines: 3,
            flush_interval,
        };
        (LogAggregator::new(notifier, settings), transport)
    }

    #[test]
    fn test_buffer_keeps_last_capacity_lines() {
        let mut buffer = LogBuffer::new(100);
        for i in 0..105 {
            buffer.push(format!("line {i}"));
        }

        assert_eq!(buffer.len(), 100);
        let all = buffer.tail(usize::MAX);
        assert_eq!(all.first().unwrap(), "line 5");
        assert_eq!(all.last().unwrap(), "line 104");
        let expected: Vec<String> = (5..105).map(|i| format!("line {i}")).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_tail_shorter_than_buffer() {
        let mut buffer = LogBuffer::new(10);
        buffer.push("a");
        buffer.push("b");
        assert_eq!(buffer.tail(5), vec!["a", "b"]);
        assert_eq!(buffer.tail(1), vec!["b"]);
        assert!(buffer.tail(0).is_empty());
    }

    #[tokio::test]
    async fn test_recent_requires_running_job() {
        let (logs, _) = aggregator(10, Duration::from_secs(60));
        assert_eq!(logs.recent(), None);

        logs.begin_job();
        assert_eq!(logs.recent(), None);

        for i in 0..5 {
            logs.append(format!("{i}"));
        }
        assert_eq!(logs.recent(), Some(vec!["2".into(), "3".into(), "4".into()]));

        logs.end_job();
        assert_eq!(logs.recent(), None);
    }

    #[tokio::test]
    async fn test_begin_job_clears_previous_output() {
        let (logs, _) = aggregator(10, Duration::from_secs(60));
        logs.begin_job();
        logs.append("old");
        logs.end_job();

        logs.begin_job();
        assert!(logs.is_empty());
        logs.append("new");
        assert_eq!(logs.tail(10), vec!["new"]);
    }

    #[tokio::test]
    async fn test_burst_is_coalesced_into_one_flush() {
        let (logs, transport) = aggregator(10, Duration::from_millis(100));
        let channel = ChannelId::new(3);
        logs.begin_job();
        let flusher = logs.stream_to(channel);

        for i in 0..50 {
            logs.append(format!("line {i}"));
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        flusher.stop().await;

        let texts = transport.texts_for(channel);
        assert_eq!(texts, vec!["```\nline 48\nline 49\n```".to_string()]);
    }

    #[tokio::test]
    async fn test_no_flush_without_new_output() {
        let (logs, transport) = aggregator(10, Duration::from_millis(40));
        let channel = ChannelId::new(3);
        logs.begin_job();
        let flusher = logs.stream_to(channel);

        logs.append("only line");
        tokio::time::sleep(Duration::from_millis(200)).await;
        flusher.stop().await;

        assert_eq!(transport.texts_for(channel).len(), 1);
    }

    #[tokio::test]
    async fn test_nothing_sent_before_first_interval() {
        let (logs, transport) = aggregator(10, Duration::from_secs(60));
        let channel = ChannelId::new(3);
        logs.begin_job();
        let flusher = logs.stream_to(channel);

        logs.append("line");
        tokio::time::sleep(Duration::from_millis(50)).await;
        flusher.stop().await;

        assert!(transport.sent().is_empty());
    }

    fn compile_line(i: usize) -> String {
        format!(
            "[{i:>3}/900] clang++ -Iexternal/foo {} -c frameworks/base/libs/androidfw/Asset{i}.cpp",
            "-Iout/soong/.intermediates/include ".repeat(70)
        )
    }

    #[test]
    fn test_snippet_keeps_newest_lines_within_limit() {
        let lines: Vec<String> = (0..5).map(compile_line).collect();
        assert!(lines.join("\n").chars().count() > 4096);

        let snippet = format_snippet(&lines, Some(4096));

        assert!(snippet.chars().count() <= 4096);
        assert!(snippet.starts_with("```\n["));
        assert!(snippet.ends_with(&format!("{}\n```", lines[4])));
        assert!(!snippet.contains(&lines[0]));
    }

    #[test]
    fn test_snippet_without_limit_is_unchanged() {
        let lines = vec!["a".to_string(), "b".to_string()];
        assert_eq!(format_snippet(&lines, None), "```\na\nb\n```");
    }

    #[tokio::test]
    async fn test_flushed_tail_fits_the_transport() {
        let (logs, transport) = aggregator_on(
            RecordingTransport::with_text_limit(4096),
            10,
            Duration::from_millis(40),
        );
        let channel = ChannelId::new(3);
        logs.begin_job();
        let flusher = logs.stream_to(channel);

        for i in 0..5 {
            logs.append(compile_line(i));
        }
        tokio::time::sleep(Duration::from_millis(120)).await;
        flusher.stop().await;

        let texts = transport.texts_for(channel);
        assert_eq!(texts.len(), 1);
        assert!(texts[0].chars().count() <= 4096);
        assert!(texts[0].ends_with("Asset4.cpp\n```"));
    }

    #[test]
    fn test_job_scope_ends_job_on_panic() {
        let (logs, _) = aggregator(10, Duration::from_secs(60));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = logs.job_scope();
            logs.append("last words");
            assert_eq!(logs.recent(), Some(vec!["last words".to_string()]));
            panic!("pipeline crashed");
        }));

        assert!(result.is_err());
        assert_eq!(logs.recent(), None);
    }
}
