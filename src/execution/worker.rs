use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::orchestration::dispatch::PendingInvocation;
use crate::pipeline::ServiceDescriptor;
use crate::request::StageResult;

/// Where workers and gateways report stage completions.
///
/// The agent implements this; workers only ever see the seam so they can be
/// driven by test doubles.
#[async_trait]
pub trait ProcessSink: Send + Sync {
    async fn process(&self, request_id: Uuid, stage: &str, result: StageResult) -> Result<()>;
}

/// Bounded-concurrency consumer loop for one pipeline stage.
///
/// Pulls pending invocations, executes the stage connector with at most the
/// descriptor's concurrency limit in flight, and reports every outcome back
/// through the sink. A connector failure becomes a typed failure result; the
/// loop itself survives any single connector.
pub struct Worker {
    service: Arc<ServiceDescriptor>,
    queue: mpsc::Receiver<PendingInvocation>,
}

impl Worker {
    pub fn new(service: Arc<ServiceDescriptor>, queue: mpsc::Receiver<PendingInvocation>) -> Self {
        Self { service, queue }
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Run the consumption loop until the stage queue closes
    pub async fn run(mut self, sink: Arc<dyn ProcessSink>) {
        let limit = self.service.concurrency_limit();
        let semaphore = Arc::new(Semaphore::new(limit));
        info!(
            stage = self.service.name(),
            concurrency_limit = limit,
            "Worker loop started"
        );

        while let Some(invocation) = self.queue.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let connector = self.service.connector();
            let sink = sink.clone();
            let stage = self.service.name().to_string();

            tokio::spawn(async move {
                let _permit = permit;
                let request_id = invocation.request_id;
                let started = Instant::now();

                let result = match connector.send(invocation.payload).await {
                    Ok(value) => StageResult::success(value),
                    Err(e) => {
                        warn!(
                            %request_id,
                            stage = %stage,
                            error = %e,
                            "Stage connector failed, recording failed-branch result"
                        );
                        StageResult::failure(e.to_string())
                    }
                };

                debug!(
                    %request_id,
                    stage = %stage,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    success = result.is_success(),
                    "Stage connector completed"
                );

                // Protocol violations abort this call path only; the loop
                // and every other in-flight request stay unaffected
                if let Err(e) = sink.process(request_id, &stage, result).await {
                    error!(
                        %request_id,
                        stage = %stage,
                        error = %e,
                        "Stage result rejected by orchestrator"
                    );
                }
            });
        }

        info!(stage = self.service.name(), "Worker loop stopped: queue closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Connector, ConnectorError, ServiceRole};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks the highwater mark of concurrent invocations
    struct GaugeConnector {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Connector for GaugeConnector {
        async fn send(&self, payload: Value) -> std::result::Result<Value, ConnectorError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(payload)
        }
    }

    struct CountingSink {
        processed: AtomicUsize,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl ProcessSink for CountingSink {
        async fn process(
            &self,
            _request_id: Uuid,
            _stage: &str,
            result: StageResult,
        ) -> Result<()> {
            self.processed.fetch_add(1, Ordering::SeqCst);
            if !result.is_success() {
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let limit = 3;
        let connector = Arc::new(GaugeConnector {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let service = Arc::new(ServiceDescriptor::new(
            "skill",
            connector.clone(),
            limit,
            [ServiceRole::Skill],
        ));
        let (tx, rx) = mpsc::channel(64);
        let sink = Arc::new(CountingSink {
            processed: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        });

        let worker = Worker::new(service, rx);
        let handle = tokio::spawn(worker.run(sink.clone()));

        for _ in 0..20 {
            tx.send(PendingInvocation::new(
                Uuid::new_v4(),
                "skill",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        // Loop exits when the queue closes; give the last spawned batch a beat
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.processed.load(Ordering::SeqCst), 20);
        assert!(connector.peak.load(Ordering::SeqCst) <= limit);
    }

    struct FailingConnector;

    #[async_trait]
    impl Connector for FailingConnector {
        async fn send(&self, _payload: Value) -> std::result::Result<Value, ConnectorError> {
            Err(ConnectorError::Invocation {
                message: "boom".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_connector_failure_becomes_typed_result() {
        let service = Arc::new(ServiceDescriptor::new(
            "skill",
            Arc::new(FailingConnector),
            1,
            [ServiceRole::Skill],
        ));
        let (tx, rx) = mpsc::channel(4);
        let sink = Arc::new(CountingSink {
            processed: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        });

        let worker = Worker::new(service, rx);
        let handle = tokio::spawn(worker.run(sink.clone()));

        tx.send(PendingInvocation::new(
            Uuid::new_v4(),
            "skill",
            serde_json::json!({}),
        ))
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sink.processed.load(Ordering::SeqCst), 1);
        assert_eq!(sink.failures.load(Ordering::SeqCst), 1);
    }
}
