//! Bridge transport
//!
//! Host half of the `backend` capability. Requests are queued to a single
//! worker task per bridge, so calls run one at a time in the order they were
//! issued and each caller gets exactly one string back, whatever happened.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::HostError;
use crate::models::{BridgeRequest, BridgeResponse, CallId, CommandSpec};
use crate::services::executor::CommandExecutor;
use crate::services::policy::{CommandPolicy, Confirmer, Verdict};

/// Reply text for a successful `Cancel` request.
pub const CANCELLED: &str = "Cancelled";

/// Where a call came from: the page's origin and which load of the page
/// issued it. Call ids are only unique within one page load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub origin: String,
    pub page: u64,
}

impl Caller {
    pub fn new(origin: impl Into<String>, page: u64) -> Self {
        Self {
            origin: origin.into(),
            page,
        }
    }
}

struct Job {
    page: u64,
    call_id: CallId,
    origin: String,
    spec: CommandSpec,
    cancel: CancellationToken,
    reply: oneshot::Sender<String>,
}

type PendingCalls = Arc<Mutex<HashMap<(u64, CallId), CancellationToken>>>;

pub struct Bridge {
    jobs: mpsc::UnboundedSender<Job>,
    pending: PendingCalls,
    completed: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl Bridge {
    /// Start the worker on the current Tokio runtime.
    pub fn spawn(
        executor: CommandExecutor,
        policy: CommandPolicy,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        let (jobs, queue) = mpsc::unbounded_channel();
        let pending = PendingCalls::default();
        let completed = Arc::new(AtomicU64::new(0));

        let worker = Worker {
            executor,
            policy,
            confirmer,
            pending: pending.clone(),
            completed: completed.clone(),
        };
        tokio::spawn(worker.run(queue));

        Self {
            jobs,
            pending,
            completed,
            shutdown: CancellationToken::new(),
        }
    }

    pub async fn call(&self, caller: &Caller, request: BridgeRequest) -> BridgeResponse {
        match request {
            BridgeRequest::ExecuteCommand { call_id, command } => {
                self.submit(call_id, caller, CommandSpec::Shell { line: command })
                    .await
            }
            BridgeRequest::Run {
                call_id,
                program,
                args,
            } => {
                self.submit(call_id, caller, CommandSpec::Exec { program, args })
                    .await
            }
            BridgeRequest::Cancel { call_id, target } => {
                let output = match self.cancel(caller, &target) {
                    Ok(()) => CANCELLED.to_string(),
                    Err(err) => err.render(),
                };
                BridgeResponse::new(call_id, output)
            }
        }
    }

    async fn submit(
        &self,
        call_id: CallId,
        caller: &Caller,
        spec: CommandSpec,
    ) -> BridgeResponse {
        log::info!(
            "[Bridge] {} from {} (page {}): {}",
            call_id,
            caller.origin,
            caller.page,
            spec.display()
        );

        let output = match self.enqueue(&call_id, caller, spec) {
            Ok(reply) => reply
                .await
                .unwrap_or_else(|_| HostError::BridgeClosed.render()),
            Err(err) => err.render(),
        };

        BridgeResponse::new(call_id, output)
    }

    fn enqueue(
        &self,
        call_id: &str,
        caller: &Caller,
        spec: CommandSpec,
    ) -> Result<oneshot::Receiver<String>, HostError> {
        let key = (caller.page, call_id.to_string());
        let cancel = self.shutdown.child_token();
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&key) {
                return Err(HostError::DuplicateCall(call_id.to_string()));
            }
            pending.insert(key.clone(), cancel.clone());
        }

        let (reply, receiver) = oneshot::channel();
        let job = Job {
            page: caller.page,
            call_id: call_id.to_string(),
            origin: caller.origin.clone(),
            spec,
            cancel,
            reply,
        };

        if self.jobs.send(job).is_err() {
            self.pending.lock().remove(&key);
            return Err(HostError::BridgeClosed);
        }

        Ok(receiver)
    }

    /// Cancel a queued or running call issued by the same page load. Its
    /// caller still gets a response.
    pub fn cancel(&self, caller: &Caller, call_id: &str) -> Result<(), HostError> {
        let pending = self.pending.lock();
        let token = pending
            .get(&(caller.page, call_id.to_string()))
            .ok_or_else(|| HostError::UnknownCall(call_id.to_string()))?;
        token.cancel();
        log::info!("[Bridge] {} cancelled", call_id);
        Ok(())
    }

    /// Calls accepted but not yet answered.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Cancel everything pending; calls made afterwards are cancelled at once.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            log::info!("[Bridge] shutting down with {} pending call(s)", self.pending());
        }
        self.shutdown.cancel();
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    executor: CommandExecutor,
    policy: CommandPolicy,
    confirmer: Arc<dyn Confirmer>,
    pending: PendingCalls,
    completed: Arc<AtomicU64>,
}

impl Worker {
    async fn run(self, mut queue: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = queue.recv().await {
            let output = if job.cancel.is_cancelled() {
                HostError::Cancelled.render()
            } else {
                self.process(&job).await
            };

            self.pending.lock().remove(&(job.page, job.call_id.clone()));
            self.completed.fetch_add(1, Ordering::Relaxed);

            // Receiver is gone only if the caller stopped waiting
            if job.reply.send(output).is_err() {
                log::debug!("[Bridge] {} answered after caller left", job.call_id);
            }
        }
        log::debug!("[Bridge] worker stopped");
    }

    async fn process(&self, job: &Job) -> String {
        match self.policy.evaluate(&job.origin, &job.spec) {
            Verdict::Allow => {}
            Verdict::Deny(reason) => {
                log::warn!("[Bridge] {} refused: {}", job.call_id, reason);
                return HostError::Denied(reason).render();
            }
            Verdict::Confirm => {
                let approved = tokio::select! {
                    approved = self.confirmer.confirm(&job.origin, &job.spec) => approved,
                    _ = job.cancel.cancelled() => return HostError::Cancelled.render(),
                };
                if !approved {
                    log::info!("[Bridge] {} declined by user", job.call_id);
                    return HostError::Denied("declined by user".to_string()).render();
                }
            }
        }

        self.executor.execute(&job.spec, &job.cancel).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::services::policy::{DenyAll, PolicyMode};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    const ORIGIN: &str = "http://localhost:5173";

    fn page(n: u64) -> Caller {
        Caller::new(ORIGIN, n)
    }

    struct ApproveAll;

    #[async_trait]
    impl Confirmer for ApproveAll {
        async fn confirm(&self, _origin: &str, _spec: &CommandSpec) -> bool {
            true
        }
    }

    fn bridge_with(policy: CommandPolicy, confirmer: Arc<dyn Confirmer>) -> (TempDir, Bridge) {
        let dir = TempDir::new().unwrap();
        let bridge = Bridge::spawn(CommandExecutor::new(dir.path()), policy, confirmer);
        (dir, bridge)
    }

    fn open_bridge() -> (TempDir, Bridge) {
        bridge_with(CommandPolicy::new(PolicyMode::Unrestricted), Arc::new(DenyAll))
    }

    fn execute(call_id: &str, command: &str) -> BridgeRequest {
        BridgeRequest::ExecuteCommand {
            call_id: call_id.to_string(),
            command: command.to_string(),
        }
    }

    #[tokio::test]
    async fn execute_command_round_trip() {
        let (_dir, bridge) = open_bridge();
        let response = bridge.call(&page(1), execute("call_0", "echo hello")).await;
        assert_eq!(response, BridgeResponse::new("call_0", "hello\n"));
        assert_eq!(bridge.completed(), 1);
        assert_eq!(bridge.pending(), 0);
    }

    #[tokio::test]
    async fn run_request_executes_program() {
        let (_dir, bridge) = open_bridge();
        let request = BridgeRequest::Run {
            call_id: "call_0".to_string(),
            program: "printf".to_string(),
            args: vec!["%s".to_string(), "a;b".to_string()],
        };
        assert_eq!(bridge.call(&page(1), request).await.output, "a;b");
    }

    #[tokio::test]
    async fn sequential_calls_answer_in_order() {
        let (_dir, bridge) = open_bridge();
        let first = bridge.call(&page(1), execute("call_0", "echo one")).await;
        let second = bridge.call(&page(1), execute("call_1", "echo two")).await;
        assert_eq!(first, BridgeResponse::new("call_0", "one\n"));
        assert_eq!(second, BridgeResponse::new("call_1", "two\n"));
    }

    #[tokio::test]
    async fn overlapping_calls_never_run_concurrently() {
        let (dir, bridge) = open_bridge();
        let caller = page(1);
        let (first, second) = tokio::join!(
            bridge.call(&caller, execute("call_0", "sleep 0.3; echo one >> order.txt; echo one")),
            bridge.call(&caller, execute("call_1", "echo two >> order.txt; echo two")),
        );

        assert_eq!(first.output, "one\n");
        assert_eq!(second.output, "two\n");
        let order = std::fs::read_to_string(dir.path().join("order.txt")).unwrap();
        assert_eq!(order, "one\ntwo\n");
    }

    #[tokio::test]
    async fn duplicate_in_flight_call_id_is_refused() {
        let (_dir, bridge) = open_bridge();
        let caller = page(1);
        let (first, second) = tokio::join!(
            bridge.call(&caller, execute("call_0", "sleep 0.2; echo first")),
            bridge.call(&caller, execute("call_0", "echo second")),
        );
        assert_eq!(first.output, "first\n");
        assert_eq!(second.output, "Error: call `call_0` is already in flight");

        // Reusable once answered
        let again = bridge.call(&page(1), execute("call_0", "echo again")).await;
        assert_eq!(again.output, "again\n");
    }

    #[tokio::test]
    async fn call_ids_are_scoped_to_page_load() {
        let (_dir, bridge) = open_bridge();
        let first_load = async {
            bridge
                .call(&page(1), execute("call_0", "sleep 0.3; echo old"))
                .await
        };
        let reload = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let cancel = bridge
                .call(
                    &page(2),
                    BridgeRequest::Cancel {
                        call_id: "call_1".to_string(),
                        target: "call_0".to_string(),
                    },
                )
                .await;
            let reused = bridge.call(&page(2), execute("call_0", "echo new")).await;
            (cancel, reused)
        };

        let (old, (cancel, reused)) = tokio::join!(first_load, reload);
        assert_eq!(old.output, "old\n");
        assert_eq!(cancel.output, "Error: no pending call `call_0`");
        assert_eq!(reused, BridgeResponse::new("call_0", "new\n"));
    }

    #[tokio::test]
    async fn cancel_stops_running_call() {
        let (_dir, bridge) = open_bridge();
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            bridge
                .call(
                    &page(1),
                    BridgeRequest::Cancel {
                        call_id: "call_1".to_string(),
                        target: "call_0".to_string(),
                    },
                )
                .await
        };
        let caller = page(1);
        let (running, cancel) =
            tokio::join!(bridge.call(&caller, execute("call_0", "sleep 5")), cancel);

        assert_eq!(running, BridgeResponse::new("call_0", "Error: command cancelled"));
        assert_eq!(cancel, BridgeResponse::new("call_1", CANCELLED));
    }

    #[tokio::test]
    async fn cancel_unknown_call_reports_error() {
        let (_dir, bridge) = open_bridge();
        let response = bridge
            .call(
                &page(1),
                BridgeRequest::Cancel {
                    call_id: "call_9".to_string(),
                    target: "call_404".to_string(),
                },
            )
            .await;
        assert_eq!(response.output, "Error: no pending call `call_404`");
    }

    #[tokio::test]
    async fn shutdown_answers_every_call() {
        let (_dir, bridge) = open_bridge();
        let stop = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            bridge.shutdown();
        };
        let caller = page(1);
        let (running, queued, ()) = tokio::join!(
            bridge.call(&caller, execute("call_0", "sleep 5")),
            bridge.call(&caller, execute("call_1", "echo never")),
            stop,
        );
        assert_eq!(running.output, "Error: command cancelled");
        assert_eq!(queued.output, "Error: command cancelled");

        let late = bridge.call(&page(1), execute("call_2", "echo late")).await;
        assert_eq!(late.output, "Error: command cancelled");
    }

    #[tokio::test]
    async fn policy_refusal_is_text() {
        let policy = CommandPolicy::new(PolicyMode::AllowList)
            .with_allowed_programs(["echo"])
            .with_allowed_origins([ORIGIN]);
        let (_dir, bridge) = bridge_with(policy, Arc::new(DenyAll));

        let allowed = bridge.call(&page(1), execute("call_0", "echo ok")).await;
        assert_eq!(allowed.output, "ok\n");

        let refused = bridge.call(&page(1), execute("call_1", "id")).await;
        assert_eq!(
            refused.output,
            "Error: command not permitted: `id` is not on the allow list"
        );

        let foreign = bridge
            .call(&Caller::new("https://evil.example", 1), execute("call_2", "echo ok"))
            .await;
        assert!(foreign.output.starts_with("Error: command not permitted: origin"));
    }

    #[tokio::test]
    async fn confirmation_gates_execution() {
        let (_dir, approving) =
            bridge_with(CommandPolicy::new(PolicyMode::Confirm), Arc::new(ApproveAll));
        let approved = approving.call(&page(1), execute("call_0", "echo yes")).await;
        assert_eq!(approved.output, "yes\n");

        let (dir, declining) =
            bridge_with(CommandPolicy::new(PolicyMode::Confirm), Arc::new(DenyAll));
        let response = declining.call(&page(1), execute("call_0", "touch marker")).await;
        assert_eq!(response.output, "Error: command not permitted: declined by user");
        assert!(!dir.path().join("marker").exists());
    }
}
