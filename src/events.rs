//! Append-only per-sprint event journal with tail-read and live-follow.
//!
//! Each event is one JSON line. Lines are never rewritten in place; the true
//! ordering is the append sequence, timestamps are informational. Tail reads
//! skip unparseable lines so one corrupt record cannot hide the rest of the
//! history.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SprintStarted,
    StoryStarted,
    TestsGenerated,
    BreakdownDone,
    ImplementationDone,
    TestsRun,
    IssueReported,
    FixAttempted,
    StoryCompleted,
    StoryFailed,
    SprintCompleted,
    Heartbeat,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SprintStarted => "sprint_started",
            Self::StoryStarted => "story_started",
            Self::TestsGenerated => "tests_generated",
            Self::BreakdownDone => "breakdown_done",
            Self::ImplementationDone => "implementation_done",
            Self::TestsRun => "tests_run",
            Self::IssueReported => "issue_reported",
            Self::FixAttempted => "fix_attempted",
            Self::StoryCompleted => "story_completed",
            Self::StoryFailed => "story_failed",
            Self::SprintCompleted => "sprint_completed",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sprint_started" => Ok(Self::SprintStarted),
            "story_started" => Ok(Self::StoryStarted),
            "tests_generated" => Ok(Self::TestsGenerated),
            "breakdown_done" => Ok(Self::BreakdownDone),
            "implementation_done" => Ok(Self::ImplementationDone),
            "tests_run" => Ok(Self::TestsRun),
            "issue_reported" => Ok(Self::IssueReported),
            "fix_attempted" => Ok(Self::FixAttempted),
            "story_completed" => Ok(Self::StoryCompleted),
            "story_failed" => Ok(Self::StoryFailed),
            "sprint_completed" => Ok(Self::SprintCompleted),
            "heartbeat" => Ok(Self::Heartbeat),
            _ => Err(format!("Invalid event type: {}", s)),
        }
    }
}

/// One immutable journal record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub data: Value,
}

impl ExecutionEvent {
    pub fn new(event_type: EventType, data: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            data,
        }
    }
}

/// A record yielded by a live-follow stream.
#[derive(Debug, Clone)]
pub enum FollowRecord {
    Event(ExecutionEvent),
    Heartbeat { timestamp: DateTime<Utc> },
}

/// Per-sprint append-only journals under a single directory.
pub struct EventLog {
    dir: PathBuf,
}

impl EventLog {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn log_path(&self, sprint_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", sprint_id))
    }

    /// Append one event as a single JSON line.
    pub fn append(&self, sprint_id: &str, event: &ExecutionEvent) -> Result<()> {
        use std::io::Write;

        std::fs::create_dir_all(&self.dir).context("Failed to create event log directory")?;
        let line = serde_json::to_string(event).context("Failed to serialize event")?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(sprint_id))
            .context("Failed to open event log")?;
        writeln!(file, "{}", line).context("Failed to write event")?;
        Ok(())
    }

    /// Return the last `n` parsed events in append order.
    /// Unparseable lines are skipped, not errors.
    pub fn tail(&self, sprint_id: &str, n: usize) -> Result<Vec<ExecutionEvent>> {
        let path = self.log_path(sprint_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let events: Vec<ExecutionEvent> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        let skip = events.len().saturating_sub(n);
        Ok(events.into_iter().skip(skip).collect())
    }

    /// Start a live-follow stream over the sprint's journal.
    ///
    /// A background producer polls the file from a byte-offset cursor,
    /// pushes newly appended events into a bounded queue, and emits a
    /// heartbeat record each interval when nothing new arrived. The producer
    /// never terminates on its own; dropping the returned handle cancels it.
    /// A full queue drops records rather than blocking the poller.
    pub fn follow(&self, sprint_id: &str, heartbeat: Duration) -> FollowHandle {
        let path = self.log_path(sprint_id);
        let (tx, rx) = mpsc::channel::<FollowRecord>(256);

        let task = tokio::spawn(async move {
            let mut offset: u64 = 0;
            loop {
                tokio::time::sleep(heartbeat).await;
                if tx.is_closed() {
                    break;
                }

                let mut fresh = Vec::new();
                if let Ok((lines, new_offset)) = read_new_lines(&path, offset) {
                    offset = new_offset;
                    fresh = lines;
                }

                if fresh.is_empty() {
                    let beat = FollowRecord::Heartbeat {
                        timestamp: Utc::now(),
                    };
                    if tx.try_send(beat).is_err() && tx.is_closed() {
                        break;
                    }
                    continue;
                }

                for line in fresh {
                    let Ok(event) = serde_json::from_str::<ExecutionEvent>(&line) else {
                        continue;
                    };
                    if tx.try_send(FollowRecord::Event(event)).is_err() && tx.is_closed() {
                        return;
                    }
                }
            }
        });

        FollowHandle { rx, task }
    }
}

/// Read complete lines appended after `offset`. Returns the lines and the
/// offset just past the last complete line, so a partially written trailing
/// line is re-read on the next poll.
fn read_new_lines(path: &Path, offset: u64) -> std::io::Result<(Vec<String>, u64)> {
    use std::io::{Read, Seek, SeekFrom};

    if !path.exists() {
        return Ok((Vec::new(), offset));
    }

    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    if len <= offset {
        return Ok((Vec::new(), offset));
    }

    file.seek(SeekFrom::Start(offset))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;

    let mut lines = Vec::new();
    let mut consumed = 0usize;
    for (i, byte) in buf.bytes().enumerate() {
        if byte == b'\n' {
            let line = buf[consumed..i].trim_end_matches('\r').to_string();
            if !line.trim().is_empty() {
                lines.push(line);
            }
            consumed = i + 1;
        }
    }

    Ok((lines, offset + consumed as u64))
}

/// Handle to a live-follow stream. Dropping it cancels the producer task.
pub struct FollowHandle {
    rx: mpsc::Receiver<FollowRecord>,
    task: tokio::task::JoinHandle<()>,
}

impl FollowHandle {
    pub async fn recv(&mut self) -> Option<FollowRecord> {
        self.rx.recv().await
    }
}

impl futures_util::Stream for FollowHandle {
    type Item = FollowRecord;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for FollowHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn make_log() -> (EventLog, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        (EventLog::new(dir.path().join("logs")), dir)
    }

    #[test]
    fn test_event_type_round_trip() {
        for ty in [
            EventType::SprintStarted,
            EventType::StoryFailed,
            EventType::Heartbeat,
        ] {
            assert_eq!(ty.as_str().parse::<EventType>().unwrap(), ty);
        }
        assert!("not_a_type".parse::<EventType>().is_err());
    }

    #[test]
    fn test_append_and_tail_round_trip() {
        let (log, _dir) = make_log();
        log.append(
            "s1",
            &ExecutionEvent::new(EventType::SprintStarted, json!({"stories": 2})),
        )
        .unwrap();
        log.append(
            "s1",
            &ExecutionEvent::new(EventType::StoryStarted, json!({"story_id": "US-1"})),
        )
        .unwrap();

        let events = log.tail("s1", 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::SprintStarted);
        assert_eq!(events[1].event_type, EventType::StoryStarted);
        assert_eq!(events[1].data["story_id"], "US-1");
    }

    #[test]
    fn test_tail_missing_log_is_empty() {
        let (log, _dir) = make_log();
        assert!(log.tail("nope", 5).unwrap().is_empty());
    }

    #[test]
    fn test_tail_returns_last_n_in_order() {
        let (log, _dir) = make_log();
        for i in 0..10 {
            log.append(
                "s1",
                &ExecutionEvent::new(EventType::FixAttempted, json!({"pass": i})),
            )
            .unwrap();
        }
        let events = log.tail("s1", 3).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].data["pass"], 7);
        assert_eq!(events[2].data["pass"], 9);
    }

    #[test]
    fn test_tail_skips_corrupt_lines() {
        use std::io::Write;

        // Ten lines on disk, one of them malformed.
        let (log, _dir) = make_log();
        for i in 0..4 {
            log.append(
                "s1",
                &ExecutionEvent::new(EventType::TestsRun, json!({"n": i})),
            )
            .unwrap();
        }
        {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(log.log_path("s1"))
                .unwrap();
            writeln!(file, "{{ corrupt line not json").unwrap();
        }
        for i in 4..9 {
            log.append(
                "s1",
                &ExecutionEvent::new(EventType::TestsRun, json!({"n": i})),
            )
            .unwrap();
        }

        let events = log.tail("s1", 50).unwrap();
        assert_eq!(events.len(), 9, "corrupt line must be skipped, not fatal");
        let ns: Vec<i64> = events.iter().map(|e| e.data["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, (0..9).collect::<Vec<i64>>(), "order must be preserved");
    }

    #[tokio::test]
    async fn test_follow_yields_appended_events() {
        let (log, _dir) = make_log();
        log.append(
            "s1",
            &ExecutionEvent::new(EventType::SprintStarted, json!({})),
        )
        .unwrap();

        let mut handle = log.follow("s1", Duration::from_millis(20));

        // First poll picks up the pre-existing event.
        let record = handle.recv().await.unwrap();
        match record {
            FollowRecord::Event(e) => assert_eq!(e.event_type, EventType::SprintStarted),
            FollowRecord::Heartbeat { .. } => panic!("expected event before heartbeat"),
        }

        log.append(
            "s1",
            &ExecutionEvent::new(EventType::StoryStarted, json!({"story_id": "US-1"})),
        )
        .unwrap();

        // The next non-heartbeat record must be the new event.
        loop {
            match handle.recv().await.unwrap() {
                FollowRecord::Event(e) => {
                    assert_eq!(e.event_type, EventType::StoryStarted);
                    break;
                }
                FollowRecord::Heartbeat { .. } => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_follow_emits_heartbeats_during_silence() {
        let (log, _dir) = make_log();
        let mut handle = log.follow("quiet", Duration::from_millis(10));

        let record = handle.recv().await.unwrap();
        assert!(matches!(record, FollowRecord::Heartbeat { .. }));
    }

    #[tokio::test]
    async fn test_follow_handle_drop_cancels_producer() {
        let (log, _dir) = make_log();
        let handle = log.follow("s1", Duration::from_millis(10));
        let abort = handle.task.abort_handle();
        drop(handle);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(abort.is_finished());
    }

    #[tokio::test]
    async fn test_follow_handle_is_a_stream() {
        use futures_util::StreamExt;

        let (log, _dir) = make_log();
        log.append(
            "s1",
            &ExecutionEvent::new(EventType::SprintStarted, json!({})),
        )
        .unwrap();

        let mut stream = log.follow("s1", Duration::from_millis(10));
        let record = stream.next().await.unwrap();
        assert!(matches!(record, FollowRecord::Event(_)));
    }

    #[test]
    fn test_read_new_lines_ignores_partial_trailing_line() {
        use std::io::Write;

        let dir = tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{{\"a\":1}}\n{{\"b\":").unwrap();

        let (lines, offset) = read_new_lines(&path, 0).unwrap();
        assert_eq!(lines, vec!["{\"a\":1}"]);

        // Completing the line makes it visible from the saved offset.
        write!(file, "2}}\n").unwrap();
        let (lines, _) = read_new_lines(&path, offset).unwrap();
        assert_eq!(lines, vec!["{\"b\":2}"]);
    }
}
