// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::{DeadLetterReason, Task, TaskKind};
use crate::domain::services::parser::{ParseError, Parser};
use crate::domain::services::result_sink::ResultSink;
use crate::queue::task_queue::{CommitOutcome, QueueError};
use crate::utils::retry_policy::RetryPolicy;
use crate::workers::runner::{Bounded, HandlerOutcome, TaskContext, TaskHandler};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// 解析任务处理逻辑
pub struct ParseHandler {
    parser: Arc<dyn Parser>,
    sink: Arc<dyn ResultSink>,
    retry_policy: RetryPolicy,
}

impl ParseHandler {
    pub fn new(parser: Arc<dyn Parser>, sink: Arc<dyn ResultSink>, retry_policy: RetryPolicy) -> Self {
        Self {
            parser,
            sink,
            retry_policy,
        }
    }

    fn retry(&self, task: &Task, ctx: &TaskContext<'_>, error: String) -> HandlerOutcome {
        HandlerOutcome::Commit(CommitOutcome::Retry {
            not_before: self
                .retry_policy
                .next_retry_time(task.attempt_count, ctx.clock.now()),
            error,
        })
    }
}

#[async_trait]
impl TaskHandler for ParseHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Parse
    }

    async fn handle(&self, task: &Task, ctx: &mut TaskContext<'_>) -> Result<HandlerOutcome, QueueError> {
        let permanent = |error: String| {
            HandlerOutcome::Commit(CommitOutcome::DeadLetter {
                reason: DeadLetterReason::Permanent,
                error,
            })
        };

        let payload = match task.payload.parse() {
            Ok(payload) => payload,
            Err(e) => return Ok(permanent(e.to_string())),
        };

        let result = match ctx.bounded(self.parser.parse(task, &payload)).await {
            Bounded::Done(Ok(value)) => value,
            Bounded::Done(Err(e @ ParseError::Invalid(_))) => return Ok(permanent(e.to_string())),
            Bounded::Done(Err(e)) => return Ok(self.retry(task, ctx, e.to_string())),
            Bounded::LeaseExpired => return Ok(HandlerOutcome::Abandon),
            Bounded::Shutdown => return Ok(HandlerOutcome::Release),
        };

        if !ctx.lease_still_valid().await? {
            return Ok(HandlerOutcome::Abandon);
        }

        if let Err(e) = self.sink.persist(task.id, &result).await {
            warn!("Failed to persist parse result: {}", e);
            return Ok(self.retry(task, ctx, e.to_string()));
        }
        Ok(HandlerOutcome::Commit(CommitOutcome::Success))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::recrawl::ContentClass;
    use crate::domain::models::task::{ParsePayload, QueueName, TaskStatus};
    use crate::domain::services::result_sink::SinkError;
    use crate::infrastructure::parser::PassthroughParser;
    use crate::infrastructure::queue::memory::MemoryQueueStore;
    use crate::infrastructure::storage::LocalResultSink;
    use crate::queue::task_queue::{QueueAdmin, QueueBackend, QueueStore};
    use crate::utils::clock::{Clock, ManualClock};
    use crate::workers::runner::{LoopSettings, PollingWorker};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use tokio::sync::watch;
    use uuid::Uuid;

    struct FailingSink;

    #[async_trait]
    impl ResultSink for FailingSink {
        async fn persist(&self, _task_id: Uuid, _result: &serde_json::Value) -> Result<(), SinkError> {
            Err(SinkError::Io(std::io::Error::other("disk full")))
        }
    }

    fn worker(
        sink: Arc<dyn ResultSink>,
    ) -> (Arc<dyn QueueBackend>, PollingWorker<ParseHandler>) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        ));
        let queue: Arc<dyn QueueBackend> = Arc::new(MemoryQueueStore::new(clock.clone()));
        let handler = ParseHandler::new(
            Arc::new(PassthroughParser::new().unwrap()),
            sink,
            RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(60)),
        );
        let worker = PollingWorker::new(
            "parse-test",
            queue.clone(),
            clock,
            Arc::new(handler),
            LoopSettings {
                lease_duration: Duration::from_secs(30),
                poll_interval: Duration::from_millis(10),
                max_store_failures: 3,
            },
        );
        (queue, worker)
    }

    fn parse_task(body: &str) -> Task {
        Task::parse(
            "https://a.test/",
            &ParsePayload {
                body: body.to_string(),
                content_class: ContentClass::Static,
                content_hash: "abc".to_string(),
                source_task_id: Uuid::new_v4(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_parse_persists_and_completes() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, worker) = worker(Arc::new(LocalResultSink::new(dir.path())));
        let (_tx, rx) = watch::channel(false);
        let task = parse_task("<html><title>Hello</title></html>");
        queue.enqueue(task.clone()).await.unwrap();

        assert!(worker.run_once(&rx).await.unwrap());
        assert_eq!(
            queue.get(task.id).await.unwrap().unwrap().status,
            TaskStatus::Completed
        );
        assert!(dir.path().join(format!("{}.json", task.id)).exists());
    }

    #[tokio::test]
    async fn test_empty_body_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, worker) = worker(Arc::new(LocalResultSink::new(dir.path())));
        let (_tx, rx) = watch::channel(false);
        let task = parse_task("");
        queue.enqueue(task.clone()).await.unwrap();

        worker.run_once(&rx).await.unwrap();
        let dead = queue.get(task.id).await.unwrap().unwrap();
        assert_eq!(dead.status, TaskStatus::DeadLettered);
        assert_eq!(dead.dead_letter_reason, Some(DeadLetterReason::Permanent));
    }

    #[tokio::test]
    async fn test_sink_failure_retries() {
        let (queue, worker) = worker(Arc::new(FailingSink));
        let (_tx, rx) = watch::channel(false);
        let task = parse_task("<p>body</p>");
        queue.enqueue(task.clone()).await.unwrap();

        worker.run_once(&rx).await.unwrap();
        let retried = queue.get(task.id).await.unwrap().unwrap();
        assert_eq!(retried.queue, QueueName::Retry);
        assert_eq!(retried.attempt_count, 1);
        assert!(retried.last_error.unwrap().contains("disk full"));
    }
}
