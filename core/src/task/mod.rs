//! Generic single-result task state machine
//!
//! Every peripheral operation is a `Task<S>` that walks
//! `Pending -> Processing(phase) -> Finished(result)` exactly once. The
//! transitions here are pure; concrete controllers (see [`connect`]) pair
//! them with the OS requests each operation needs.
//!
//! A task owns the sending half of a oneshot channel. Reaching `Finished`
//! delivers the result to the matching [`TaskCompletion`], so an observer
//! sees at most one result per task.
pub mod connect;

use crate::peripheral::PeripheralIdentifier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error};
use uuid::Uuid;

pub use connect::{ConnectPhase, ConnectTask, ConnectTaskController, ConnectTaskSpec};

/// Describes one kind of task: its phases and its result
pub trait TaskSpec: fmt::Debug + Send + 'static {
    /// Sub-step tag while processing
    type Phase: fmt::Debug + Copy + Eq + Send + 'static;
    /// Terminal result delivered to the observer
    type Result: fmt::Debug + Clone + Send + 'static;

    /// Task kind used in logs and violation reports
    const NAME: &'static str;
}

/// State of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState<R, P> {
    Pending,
    Processing { since: SystemTime, phase: P },
    Finished { result: R },
}

impl<R, P> TaskState<R, P> {
    pub fn name(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Processing { .. } => "processing",
            TaskState::Finished { .. } => "finished",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TaskState::Pending)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TaskState::Finished { .. })
    }

    /// Phase currently being processed
    pub fn phase(&self) -> Option<&P> {
        match self {
            TaskState::Processing { phase, .. } => Some(phase),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&R> {
        match self {
            TaskState::Finished { result } => Some(result),
            _ => None,
        }
    }
}

/// Errors observed by a [`TaskCompletion`]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionError {
    #[error("Task dropped before finishing")]
    Dropped,
}

/// A transition the task protocol forbids
///
/// Carries the untouched task back to the caller so ownership is never lost.
#[derive(Error, Debug)]
#[error("Invariant violated: {operation} on {kind} task {task_id} in state {state}")]
pub struct InvariantViolation<S: TaskSpec> {
    pub operation: &'static str,
    pub kind: &'static str,
    pub state: &'static str,
    pub task_id: Uuid,
    task: Task<S>,
}

impl<S: TaskSpec> InvariantViolation<S> {
    fn new(operation: &'static str, task: Task<S>) -> Self {
        Self {
            operation,
            kind: S::NAME,
            state: task.state.name(),
            task_id: task.id,
            task,
        }
    }

    /// Recover the task the rejected call was made on
    pub fn into_task(self) -> Task<S> {
        self.task
    }
}

/// Result of a task operation
pub type TaskOutcome<S> = Result<Task<S>, InvariantViolation<S>>;

/// How a rejected transition is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantPolicy {
    /// Panic on the first violation (debug builds, tests)
    Abort,
    /// Log at error level and hand the violation back as `Err`
    Report,
}

impl Default for InvariantPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            InvariantPolicy::Abort
        } else {
            InvariantPolicy::Report
        }
    }
}

impl InvariantPolicy {
    /// Apply the policy to the outcome of a task operation
    pub fn enforce<S: TaskSpec>(self, outcome: TaskOutcome<S>) -> TaskOutcome<S> {
        if let Err(violation) = &outcome {
            error!(
                peripheral = %violation.task.peripheral,
                "{}", violation
            );
            if self == InvariantPolicy::Abort {
                panic!("{}", violation);
            }
        }
        outcome
    }
}

/// Single-result operation bound to one peripheral
#[derive(Debug)]
pub struct Task<S: TaskSpec> {
    id: Uuid,
    peripheral: PeripheralIdentifier,
    state: TaskState<S::Result, S::Phase>,
    completion: Option<oneshot::Sender<S::Result>>,
}

impl<S: TaskSpec> Task<S> {
    /// Create a pending task and the handle its result will be delivered to
    pub fn new(peripheral: PeripheralIdentifier) -> (Self, TaskCompletion<S>) {
        let (sender, receiver) = oneshot::channel();
        let task = Self {
            id: Uuid::new_v4(),
            peripheral,
            state: TaskState::Pending,
            completion: Some(sender),
        };
        let completion = TaskCompletion {
            task_id: task.id,
            receiver,
        };
        (task, completion)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peripheral(&self) -> &PeripheralIdentifier {
        &self.peripheral
    }

    pub fn state(&self) -> &TaskState<S::Result, S::Phase> {
        &self.state
    }

    /// Pending -> Processing(phase)
    pub fn begin(mut self, phase: S::Phase) -> TaskOutcome<S> {
        if !self.state.is_pending() {
            return Err(InvariantViolation::new("begin", self));
        }
        self.state = TaskState::Processing {
            since: SystemTime::now(),
            phase,
        };
        debug!(task = %self.id, kind = S::NAME, phase = ?phase, "task processing");
        Ok(self)
    }

    /// Processing(phase) -> Finished(result), only for the matching phase
    pub fn complete(self, phase: S::Phase, result: S::Result) -> TaskOutcome<S> {
        if self.state.phase() != Some(&phase) {
            return Err(InvariantViolation::new("complete", self));
        }
        Ok(self.finish(result))
    }

    /// Pending or Processing -> Finished(result)
    pub fn terminate(self, result: S::Result) -> TaskOutcome<S> {
        if self.state.is_finished() {
            return Err(InvariantViolation::new("terminate", self));
        }
        Ok(self.finish(result))
    }

    fn finish(mut self, result: S::Result) -> Self {
        if let Some(sender) = self.completion.take() {
            if sender.send(result.clone()).is_err() {
                debug!(task = %self.id, kind = S::NAME, "task observer gone, result discarded");
            }
        }
        debug!(task = %self.id, kind = S::NAME, result = ?result, "task finished");
        self.state = TaskState::Finished { result };
        self
    }
}

/// Receiving side of a task's single result
///
/// Resolves once with the finished result, or with
/// [`CompletionError::Dropped`] if the task was dropped unfinished.
#[derive(Debug)]
pub struct TaskCompletion<S: TaskSpec> {
    task_id: Uuid,
    receiver: oneshot::Receiver<S::Result>,
}

impl<S: TaskSpec> TaskCompletion<S> {
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Non-blocking check; `None` while the task is still running
    pub fn try_result(&mut self) -> Option<Result<S::Result, CompletionError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(Ok(result)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(CompletionError::Dropped)),
        }
    }
}

impl<S: TaskSpec> Future for TaskCompletion<S> {
    type Output = Result<S::Result, CompletionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.map_err(|_| CompletionError::Dropped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct ProbeSpec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum ProbePhase {
        First,
        Second,
    }

    impl TaskSpec for ProbeSpec {
        type Phase = ProbePhase;
        type Result = u32;
        const NAME: &'static str = "probe";
    }

    fn new_task() -> (Task<ProbeSpec>, TaskCompletion<ProbeSpec>) {
        Task::new(PeripheralIdentifier::random())
    }

    #[test]
    fn test_task_starts_pending() {
        let (task, _completion) = new_task();
        assert!(task.state().is_pending());
        assert_eq!(task.state().name(), "pending");
    }

    #[test]
    fn test_full_lifecycle_delivers_result_once() {
        let (task, mut completion) = new_task();
        assert!(completion.try_result().is_none());

        let task = task.begin(ProbePhase::First).expect("Begin");
        assert_eq!(task.state().phase(), Some(&ProbePhase::First));
        assert!(completion.try_result().is_none());

        let task = task.complete(ProbePhase::First, 42).expect("Complete");
        assert_eq!(task.state().result(), Some(&42));
        assert_eq!(completion.try_result(), Some(Ok(42)));
    }

    #[test]
    fn test_begin_rejected_when_not_pending() {
        let (task, _completion) = new_task();
        let task = task.begin(ProbePhase::First).expect("Begin");

        let violation = task.begin(ProbePhase::First).expect_err("Second begin");
        assert_eq!(violation.operation, "begin");
        assert_eq!(violation.state, "processing");

        let task = violation.into_task().terminate(0).expect("Terminate");
        let violation = task.begin(ProbePhase::First).expect_err("Begin after finish");
        assert_eq!(violation.state, "finished");
    }

    #[test]
    fn test_complete_rejected_for_wrong_phase() {
        let (task, mut completion) = new_task();
        let task = task.begin(ProbePhase::First).expect("Begin");

        let violation = task.complete(ProbePhase::Second, 1).expect_err("Wrong phase");
        assert_eq!(violation.operation, "complete");

        // Untouched by the rejected call
        let task = violation.into_task();
        assert_eq!(task.state().phase(), Some(&ProbePhase::First));
        assert!(completion.try_result().is_none());
    }

    #[test]
    fn test_complete_rejected_when_pending() {
        let (task, _completion) = new_task();
        let violation = task.complete(ProbePhase::First, 1).expect_err("Pending");
        assert_eq!(violation.state, "pending");
    }

    #[test]
    fn test_finished_is_absorbing() {
        let (task, mut completion) = new_task();
        let task = task.terminate(7).expect("Terminate from pending");

        let task = task.terminate(8).expect_err("Terminate twice").into_task();
        let task = task
            .complete(ProbePhase::First, 9)
            .expect_err("Complete after finish")
            .into_task();

        assert_eq!(task.state().result(), Some(&7));
        assert_eq!(completion.try_result(), Some(Ok(7)));
    }

    #[test]
    fn test_terminate_from_processing() {
        let (task, mut completion) = new_task();
        let task = task.begin(ProbePhase::Second).expect("Begin");
        let task = task.terminate(3).expect("Terminate");
        assert!(task.state().is_finished());
        assert_eq!(completion.try_result(), Some(Ok(3)));
    }

    #[test]
    fn test_dropped_task_closes_completion() {
        let (task, mut completion) = new_task();
        drop(task);
        assert_eq!(completion.try_result(), Some(Err(CompletionError::Dropped)));
    }

    #[test]
    fn test_result_discarded_when_observer_gone() {
        let (task, completion) = new_task();
        drop(completion);
        let task = task.terminate(5).expect("Terminate");
        assert_eq!(task.state().result(), Some(&5));
    }

    #[test]
    fn test_report_policy_returns_violation() {
        let (task, _completion) = new_task();
        let task = task.terminate(1).expect("Terminate");

        let outcome = InvariantPolicy::Report.enforce(task.terminate(2));
        assert!(outcome.is_err());
    }

    #[test]
    #[should_panic(expected = "Invariant violated")]
    fn test_abort_policy_panics() {
        let (task, _completion) = new_task();
        let task = task.terminate(1).expect("Terminate");
        let _ = InvariantPolicy::Abort.enforce(task.terminate(2));
    }

    #[tokio::test]
    async fn test_completion_future_resolves() {
        let (task, completion) = new_task();
        let handle = tokio::spawn(completion);

        let task = task.begin(ProbePhase::First).expect("Begin");
        let _task = task.complete(ProbePhase::First, 11).expect("Complete");

        let result = handle.await.expect("Join");
        assert_eq!(result, Ok(11));
    }

    #[test]
    fn test_completion_pending_until_finished() {
        let (task, completion) = new_task();
        let mut completion = tokio_test::task::spawn(completion);
        tokio_test::assert_pending!(completion.poll());

        let task = task.begin(ProbePhase::Second).expect("Begin");
        tokio_test::assert_pending!(completion.poll());

        let _task = task.complete(ProbePhase::Second, 9).expect("Complete");
        assert!(completion.is_woken());
        tokio_test::assert_ready_eq!(completion.poll(), Ok(9));
    }
}
