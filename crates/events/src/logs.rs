//! Live log multiplexer.
//!
//! [`LogHub`] keeps a registry of job id to live subscribers. Each published
//! line is appended to `<dir>/<job_id>.log` and flushed before being
//! forwarded, so a reader of the file never lags behind a subscriber.
//! Subscribers whose handle has been dropped are pruned the next time a
//! line is published for their job, or by [`LogHub::sweep`].
//!
//! The registry lock is only held to look up or insert a job's entry. File
//! writes and forwarding happen under that job's own lock, so jobs never
//! wait on each other's output.
//!
//! The hub is an ordinary value: create one per server (or per test) and
//! share it behind an `Arc`.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use sourcepin_core::context::LogSink;
use sourcepin_core::types::JobId;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// File extension of durable job logs.
const LOG_EXTENSION: &str = "log";

/// Longest job id accepted as a file name.
const MAX_JOB_ID_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// A live subscriber as seen by the hub.
struct Subscriber {
    token: CancellationToken,
    sender: mpsc::UnboundedSender<String>,
}

impl Subscriber {
    fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.sender.is_closed()
    }
}

/// Receiving end of a subscription.
///
/// Yields the durable log written so far, then live lines until the job is
/// closed. Dropping it detaches the subscriber.
pub struct LogSubscription {
    receiver: mpsc::UnboundedReceiver<String>,
    token: CancellationToken,
}

impl LogSubscription {
    /// Next line, or `None` once the job's log has ended.
    pub async fn next_line(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Token that is cancelled when this subscription is dropped.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Per-job state: the open log file and the attached subscribers.
#[derive(Default)]
struct JobLog {
    open: bool,
    file: Option<File>,
    subscribers: Vec<Subscriber>,
}

impl JobLog {
    fn prune(&mut self) {
        self.subscribers.retain(Subscriber::is_active);
    }

    async fn append(&mut self, path: &Path, line: &str) -> io::Result<()> {
        if self.file.is_none() {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            self.file = Some(file);
        }
        if let Some(file) = self.file.as_mut() {
            let mut record = String::with_capacity(line.len() + 1);
            record.push_str(line);
            record.push('\n');
            file.write_all(record.as_bytes()).await?;
            file.flush().await?;
        }
        Ok(())
    }

    fn forward(&mut self, line: &str) {
        self.subscribers
            .retain(|s| s.is_active() && s.sender.send(line.to_string()).is_ok());
    }
}

type SharedJobLog = Arc<Mutex<JobLog>>;

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Registry entries dropped because nobody was listening.
    pub dropped_entries: usize,
    /// Durable log files deleted for exceeding the retention window.
    pub deleted_files: usize,
}

// ---------------------------------------------------------------------------
// LogHub
// ---------------------------------------------------------------------------

pub struct LogHub {
    dir: PathBuf,
    retention: Duration,
    jobs: RwLock<HashMap<JobId, SharedJobLog>>,
}

impl LogHub {
    /// Create a hub writing into `dir`, creating the directory if needed.
    pub async fn create(dir: impl Into<PathBuf>, retention: Duration) -> io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            retention,
            jobs: RwLock::new(HashMap::new()),
        })
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Durable file for `job_id`, or `None` if the id cannot be a file name.
    fn log_path(&self, job_id: &JobId) -> Option<PathBuf> {
        let id = job_id.as_str();
        let well_formed = !id.is_empty()
            && id.len() <= MAX_JOB_ID_LEN
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        well_formed.then(|| self.dir.join(format!("{id}.{LOG_EXTENSION}")))
    }

    async fn get(&self, job_id: &JobId) -> Option<SharedJobLog> {
        self.jobs.read().await.get(job_id).cloned()
    }

    async fn get_or_insert(&self, job_id: &JobId) -> SharedJobLog {
        if let Some(log) = self.get(job_id).await {
            return log;
        }
        self.jobs
            .write()
            .await
            .entry(job_id.clone())
            .or_default()
            .clone()
    }

    /// Mark a job as running so that subscribers attach to its live stream.
    pub async fn open(&self, job_id: &JobId) {
        self.get_or_insert(job_id).await.lock().await.open = true;
    }

    /// Mark a job as finished and end every subscriber's stream.
    pub async fn close(&self, job_id: &JobId) {
        if let Some(log) = self.get(job_id).await {
            let mut log = log.lock().await;
            log.open = false;
            log.file = None;
            log.subscribers.clear();
        }
    }

    /// End every subscriber's stream. Used at shutdown.
    pub async fn close_all(&self) {
        let drained: Vec<SharedJobLog> = self.jobs.write().await.drain().map(|(_, log)| log).collect();
        let mut count = 0;
        for log in drained {
            let mut log = log.lock().await;
            count += log.subscribers.len();
            log.open = false;
            log.file = None;
            log.subscribers.clear();
        }
        tracing::info!(count, "Closed all log subscribers");
    }

    pub async fn is_open(&self, job_id: &JobId) -> bool {
        match self.get(job_id).await {
            Some(log) => log.lock().await.open,
            None => false,
        }
    }

    /// Number of live subscribers currently attached to `job_id`.
    pub async fn subscriber_count(&self, job_id: &JobId) -> usize {
        match self.get(job_id).await {
            Some(log) => {
                let mut log = log.lock().await;
                log.prune();
                log.subscribers.len()
            }
            None => 0,
        }
    }

    /// Attach to a job's log.
    ///
    /// The durable log is replayed first. If the job is still running the
    /// subscriber then receives live lines; otherwise the stream ends right
    /// after the replay. Replay and registration happen under the job's
    /// lock, so no line is lost or duplicated in between.
    pub async fn subscribe(&self, job_id: &JobId) -> LogSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let log = self.get(job_id).await;
        let mut guard = match &log {
            Some(log) => Some(log.lock().await),
            None => None,
        };
        for line in self.read_log(job_id).await.lines() {
            let _ = sender.send(line.to_string());
        }
        if let Some(log) = guard.as_mut().filter(|log| log.open) {
            log.prune();
            log.subscribers.push(Subscriber {
                token: token.clone(),
                sender,
            });
        }
        drop(guard);

        LogSubscription { receiver, token }
    }

    /// Full text of a job's durable log, empty if there is none.
    pub async fn read_log(&self, job_id: &JobId) -> String {
        let Some(path) = self.log_path(job_id) else {
            return String::new();
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Could not read job log");
                String::new()
            }
        }
    }

    /// Drop registry entries nobody listens to and delete expired files.
    ///
    /// Entries busy with a write are left for the next sweep.
    pub async fn sweep(&self) -> SweepReport {
        let mut keep: HashSet<PathBuf> = HashSet::new();
        let dropped_entries = {
            let mut jobs = self.jobs.write().await;
            let before = jobs.len();
            jobs.retain(|id, log| {
                let retained = match log.try_lock() {
                    Ok(mut log) => {
                        log.prune();
                        if log.open || !log.subscribers.is_empty() {
                            Some(log.open)
                        } else {
                            None
                        }
                    }
                    Err(_) => Some(true),
                };
                if retained == Some(true) {
                    keep.extend(self.log_path(id));
                }
                retained.is_some()
            });
            before - jobs.len()
        };

        let deleted_files = self.delete_expired(&keep).await;
        SweepReport {
            dropped_entries,
            deleted_files,
        }
    }

    async fn delete_expired(&self, keep: &HashSet<PathBuf>) -> usize {
        let cutoff = SystemTime::now()
            .checked_sub(self.retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Could not scan log directory");
                return 0;
            }
        };

        let mut deleted = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION)
                || keep.contains(&path)
            {
                continue;
            }
            let expired = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified <= cutoff,
                Err(_) => false,
            };
            if !expired {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Could not delete job log")
                }
            }
        }
        deleted
    }
}

#[async_trait]
impl LogSink for LogHub {
    async fn publish(&self, job_id: &JobId, line: &str) {
        let log = self.get_or_insert(job_id).await;
        let mut log = log.lock().await;

        if let Some(path) = self.log_path(job_id) {
            if let Err(e) = log.append(&path, line).await {
                log.file = None;
                tracing::warn!(job_id = %job_id, error = %e, "Could not append to job log");
            }
        }
        log.forward(line);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    async fn hub(dir: &Path) -> LogHub {
        LogHub::create(dir.join("logs"), Duration::from_secs(3600))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn published_lines_are_durable() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = hub(tmp.path()).await;
        let job = JobId::from("job1");

        hub.publish(&job, "first").await;
        hub.publish(&job, "second").await;

        assert_eq!(hub.read_log(&job).await, "first\nsecond\n");
        assert!(tmp.path().join("logs/job1.log").exists());
    }

    #[tokio::test]
    async fn live_subscriber_receives_lines_until_close() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = hub(tmp.path()).await;
        let job = JobId::from("job1");
        hub.open(&job).await;

        let mut sub = hub.subscribe(&job).await;
        hub.publish(&job, "hello").await;
        hub.close(&job).await;

        assert_eq!(sub.next_line().await.as_deref(), Some("hello"));
        assert_eq!(sub.next_line().await, None);
    }

    #[tokio::test]
    async fn late_subscriber_catches_up_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = hub(tmp.path()).await;
        let job = JobId::from("job1");
        hub.open(&job).await;
        hub.publish(&job, "early").await;

        let mut sub = hub.subscribe(&job).await;
        hub.publish(&job, "late").await;

        assert_eq!(sub.next_line().await.as_deref(), Some("early"));
        assert_eq!(sub.next_line().await.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn finished_job_replays_and_ends() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = hub(tmp.path()).await;
        let job = JobId::from("job1");
        hub.open(&job).await;
        hub.publish(&job, "only").await;
        hub.close(&job).await;

        let mut sub = hub.subscribe(&job).await;
        assert_eq!(sub.next_line().await.as_deref(), Some("only"));
        assert_eq!(sub.next_line().await, None);
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = hub(tmp.path()).await;
        let job = JobId::from("job1");
        hub.open(&job).await;

        let keep = hub.subscribe(&job).await;
        let gone = hub.subscribe(&job).await;
        assert_eq!(hub.subscriber_count(&job).await, 2);

        drop(gone);
        hub.publish(&job, "line").await;
        assert_eq!(hub.subscriber_count(&job).await, 1);
        drop(keep);
    }

    #[tokio::test]
    async fn unsafe_job_ids_never_touch_the_filesystem() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = hub(tmp.path()).await;
        let job = JobId::from("../escape");

        hub.publish(&job, "nope").await;

        assert_eq!(hub.read_log(&job).await, "");
        assert!(!tmp.path().join("escape.log").exists());
    }

    #[tokio::test]
    async fn sweep_drops_idle_entries_and_expired_files() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = LogHub::create(tmp.path().join("logs"), Duration::ZERO)
            .await
            .unwrap();
        let running = JobId::from("running");
        let finished = JobId::from("finished");

        hub.open(&running).await;
        hub.open(&finished).await;
        hub.publish(&running, "still going").await;
        hub.publish(&finished, "done").await;
        hub.close(&finished).await;

        let report = hub.sweep().await;

        assert_eq!(report.dropped_entries, 1);
        assert_eq!(report.deleted_files, 1);
        assert!(hub.is_open(&running).await);
        assert_eq!(hub.read_log(&running).await, "still going\n");
        assert_eq!(hub.read_log(&finished).await, "");
    }

    #[tokio::test]
    async fn busy_job_does_not_hold_up_other_jobs() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = hub(tmp.path()).await;
        let (quiet, busy) = (JobId::from("quiet"), JobId::from("busy"));
        hub.open(&quiet).await;
        hub.open(&busy).await;

        let busy_log = hub.get_or_insert(&busy).await;
        let writing = busy_log.lock().await;

        tokio::time::timeout(Duration::from_secs(5), async {
            hub.publish(&quiet, "still flowing").await;
            let _sub = hub.subscribe(&quiet).await;
            hub.sweep().await;
        })
        .await
        .expect("other jobs proceed while one job's log is busy");

        assert_eq!(hub.read_log(&quiet).await, "still flowing\n");
        drop(writing);
        assert!(hub.is_open(&busy).await);
    }

    #[tokio::test]
    async fn sweep_keeps_recent_files() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = hub(tmp.path()).await;
        let job = JobId::from("job1");
        hub.publish(&job, "recent").await;

        let report = hub.sweep().await;

        assert_eq!(report.deleted_files, 0);
        assert_eq!(hub.read_log(&job).await, "recent\n");
    }
}
