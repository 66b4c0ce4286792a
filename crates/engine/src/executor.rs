//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the state machine that advances one [`Execution`]
//! through a [`CompiledWorkflow`]:
//! 1. Resolves the control at the execution's position (none left: completed).
//! 2. Invokes the control's service, if it has one, and merges the reply into
//!    the variable scopes. Service calls and every `go` are recorded in the
//!    history.
//! 3. Applies the control kind: `go` moves on in pre-order, `if` enters or
//!    skips its subtree, `loop` enters its body again or moves past it,
//!    `wait` suspends.
//! 4. Persists the execution, plus the step's history record, as one commit.
//!
//! A failed service call or expression marks the execution failed at the
//! position it failed on and is returned to the caller. Retrying is left to
//! the invoker (see [`invoker::RetryingInvoker`]).

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, instrument, warn};

use db::models::ExecutionStatus;
use db::Repository;
use invoker::{Payload, ServiceInvoker};

use crate::clock::Clock;
use crate::config::{EngineConfig, LocalScopePolicy, ResponseMerge};
use crate::expression::ExpressionEvaluator;
use crate::history::{HistoryRecorder, StepRecord};
use crate::models::{Execution, History, LoopFrame};
use crate::tree::{CompiledWorkflow, ControlKind, ControlNode, ControlTree};
use crate::variables::{ScopeKind, Variables};
use crate::EngineError;

/// What a single step left the execution in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Still running; another step may follow.
    Advanced,
    Suspended,
    Completed,
}

pub struct WorkflowExecutor {
    repository: Arc<dyn Repository>,
    invoker: Arc<dyn ServiceInvoker>,
    evaluator: ExpressionEvaluator,
    recorder: HistoryRecorder,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

/// Where the position goes after `next`, given the active loops.
///
/// Leaving the body of the innermost active loop returns to the loop control
/// so its condition is evaluated again.
fn settle(tree: &ControlTree, loops: &[LoopFrame], next: usize) -> usize {
    match loops.last() {
        Some(frame)
            if tree
                .get(frame.control)
                .map_or(true, |lp| next >= lp.subtree_end) =>
        {
            frame.control
        }
        _ => next,
    }
}

impl WorkflowExecutor {
    pub fn new(
        repository: Arc<dyn Repository>,
        invoker: Arc<dyn ServiceInvoker>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            repository,
            invoker,
            evaluator: ExpressionEvaluator::new(config.max_expression_operations),
            recorder: HistoryRecorder::new(clock.clone()),
            clock,
            config,
        }
    }

    /// Step `execution` until it suspends or completes.
    ///
    /// # Errors
    /// The first failing step's error; the execution has then been persisted
    /// as failed.
    #[instrument(skip_all, fields(execution_id = %execution.id, workflow = %workflow.workflow.name))]
    pub async fn run(
        &self,
        workflow: &CompiledWorkflow,
        execution: &mut Execution,
    ) -> Result<StepOutcome, EngineError> {
        loop {
            match self.step(workflow, execution).await? {
                StepOutcome::Advanced => continue,
                outcome => return Ok(outcome),
            }
        }
    }

    /// Execute exactly one step and persist its effects.
    pub async fn step(
        &self,
        workflow: &CompiledWorkflow,
        execution: &mut Execution,
    ) -> Result<StepOutcome, EngineError> {
        if execution.state != ExecutionStatus::Running {
            return Err(EngineError::InvalidState {
                execution_id: execution.id,
                state: execution.state,
                operation: "step",
            });
        }

        let tree = &workflow.tree;
        let position = execution.current_control;
        let Some(node) = tree.get(position) else {
            execution.state = ExecutionStatus::Completed;
            self.commit(execution, None).await?;
            info!("execution {} completed", execution.id);
            return Ok(StepOutcome::Completed);
        };

        // ------------------------------------------------------------------
        // Attached service.
        // ------------------------------------------------------------------
        let mut record = None;
        let last_good = node.service.as_ref().map(|_| execution.variables.clone());
        if let Some(name) = &node.service {
            let service = workflow.service(name).ok_or_else(|| EngineError::UnknownService {
                service: name.clone(),
                path: format!("position {position}"),
            })?;

            let request = Payload::new(
                execution.variables.to_request().to_string().into_bytes(),
                service.consumes.clone(),
            );

            let outcome = match self.invoker.invoke(service, request.clone()).await {
                Ok(reply) => match self.merge_response(&mut execution.variables, &reply) {
                    Ok(()) => Ok(reply),
                    Err(message) => Err((Some(reply), message)),
                },
                Err(err) => Err((None, err.to_string())),
            };

            match outcome {
                Ok(reply) => {
                    info!("control {} ({}) invoked '{}'", position, node.kind.name(), name);
                    record = Some(StepRecord {
                        control: position,
                        service: Some(name.clone()),
                        request,
                        response: Some(reply),
                        failure: None,
                    });
                }
                Err((reply, message)) => {
                    let history = self.recorder.record(
                        execution,
                        StepRecord {
                            control: position,
                            service: Some(name.clone()),
                            request,
                            response: reply,
                            failure: Some(message.clone()),
                        },
                    );
                    let err = EngineError::ServiceInvocation {
                        execution_id: execution.id,
                        position,
                        service: name.clone(),
                        message,
                    };
                    return Err(self.fail(execution, Some(history), err).await);
                }
            }
        }

        if record.is_none() && matches!(node.kind, ControlKind::Go) {
            record = Some(StepRecord {
                control: position,
                service: None,
                request: Payload::default(),
                response: None,
                failure: None,
            });
        }

        // ------------------------------------------------------------------
        // Kind-specific transition.
        // ------------------------------------------------------------------
        let next = match self.transition(position, node, execution) {
            Ok(next) => next,
            Err(err) => {
                // A failed step leaves the scopes as they were.
                if let Some(variables) = last_good {
                    execution.variables = variables;
                }
                let history = record.map(|mut r| {
                    r.failure = Some(err.to_string());
                    self.recorder.record(execution, r)
                });
                return Err(self.fail(execution, history, err).await);
            }
        };
        let history = record.map(|r| self.recorder.record(execution, r));

        let outcome = match next {
            None => {
                execution.state = ExecutionStatus::Suspended;
                StepOutcome::Suspended
            }
            Some(next) => {
                execution.current_control = settle(tree, &execution.loops, next);
                if execution.current_control >= tree.len() {
                    execution.state = ExecutionStatus::Completed;
                    StepOutcome::Completed
                } else {
                    StepOutcome::Advanced
                }
            }
        };

        self.commit(execution, history.as_ref()).await?;

        match outcome {
            StepOutcome::Suspended => info!("execution {} suspended at control {}", execution.id, position),
            StepOutcome::Completed => info!("execution {} completed", execution.id),
            StepOutcome::Advanced => {}
        }
        Ok(outcome)
    }

    /// Leave the `wait` control the execution is suspended at and keep
    /// stepping.
    pub async fn resume(
        &self,
        workflow: &CompiledWorkflow,
        execution: &mut Execution,
    ) -> Result<StepOutcome, EngineError> {
        if execution.state != ExecutionStatus::Suspended {
            return Err(EngineError::InvalidState {
                execution_id: execution.id,
                state: execution.state,
                operation: "resume",
            });
        }

        let tree = &workflow.tree;
        execution.current_control = settle(tree, &execution.loops, execution.current_control + 1);
        execution.state = if execution.current_control >= tree.len() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Running
        };
        self.commit(execution, None).await?;
        info!("execution {} resumed at control {}", execution.id, execution.current_control);

        if execution.state == ExecutionStatus::Completed {
            return Ok(StepOutcome::Completed);
        }
        self.run(workflow, execution).await
    }

    /// Stop a running or suspended execution for good.
    pub async fn cancel(&self, execution: &mut Execution) -> Result<(), EngineError> {
        if execution.state.is_terminal() {
            return Err(EngineError::InvalidState {
                execution_id: execution.id,
                state: execution.state,
                operation: "cancel",
            });
        }

        execution.state = ExecutionStatus::Cancelled;
        self.commit(execution, None).await?;
        info!("execution {} cancelled at control {}", execution.id, execution.current_control);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal: control kinds.
    // -----------------------------------------------------------------------

    /// The position after `node`, or `None` to suspend.
    fn transition(
        &self,
        position: usize,
        node: &ControlNode,
        execution: &mut Execution,
    ) -> Result<Option<usize>, EngineError> {
        match &node.kind {
            ControlKind::Go => Ok(Some(position + 1)),

            ControlKind::If { expression } => {
                if self.evaluate(position, expression, execution)? {
                    Ok(Some(position + 1))
                } else {
                    Ok(Some(node.subtree_end))
                }
            }

            ControlKind::Loop { expression } => {
                self.iterate(position, node, expression, execution).map(Some)
            }

            ControlKind::Wait => Ok(None),
        }
    }

    /// Decide whether a loop runs its body once more.
    ///
    /// The condition sees the variables the previous iteration left behind;
    /// the iteration cap is checked first.
    fn iterate(
        &self,
        position: usize,
        node: &ControlNode,
        expression: &str,
        execution: &mut Execution,
    ) -> Result<usize, EngineError> {
        let active = execution.loops.last().filter(|f| f.control == position);
        let iterations = active.map_or(0, |f| f.iterations);
        let active = active.is_some();

        if iterations >= self.config.max_loop_iterations {
            warn!(
                "loop at control {} of execution {} hit the iteration cap ({})",
                position, execution.id, self.config.max_loop_iterations
            );
            if active {
                execution.loops.pop();
            }
            return Ok(node.subtree_end);
        }

        if !self.evaluate(position, expression, execution)? {
            if active {
                execution.loops.pop();
            }
            return Ok(node.subtree_end);
        }

        if !active {
            execution.loops.push(LoopFrame {
                control: position,
                iterations: 0,
                entry_locals: execution.variables.local.clone(),
            });
        }
        if let Some(frame) = execution.loops.last_mut() {
            frame.iterations += 1;
            if self.config.local_scope == LocalScopePolicy::ResetPerIteration && frame.iterations > 1 {
                execution.variables.local = frame.entry_locals.clone();
            }
        }
        Ok(position + 1)
    }

    fn evaluate(
        &self,
        position: usize,
        expression: &str,
        execution: &Execution,
    ) -> Result<bool, EngineError> {
        self.evaluator
            .evaluate(expression, &execution.variables)
            .map_err(|message| EngineError::ExpressionEvaluation {
                execution_id: execution.id,
                position,
                expression: expression.to_owned(),
                message,
            })
    }

    // -----------------------------------------------------------------------
    // Internal: variables.
    // -----------------------------------------------------------------------

    /// Merge a service reply into the scopes per [`ResponseMerge`].
    ///
    /// Only JSON objects are merged. Either the whole merge applies or,
    /// on error, nothing does.
    fn merge_response(&self, variables: &mut Variables, reply: &Payload) -> Result<(), String> {
        if self.config.response_merge == ResponseMerge::Ignore || !reply.is_json() {
            return Ok(());
        }
        if reply.data.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }

        let value: Value = serde_json::from_slice(&reply.data)
            .map_err(|e| format!("malformed JSON response: {e}"))?;
        let Value::Object(object) = value else {
            return Ok(());
        };

        match self.config.response_merge {
            ResponseMerge::Local => {
                variables.merge(ScopeKind::Local, &object);
            }
            ResponseMerge::Global => {
                variables.merge(ScopeKind::Global, &object);
            }
            ResponseMerge::Scoped => {
                let member = |key: &str| match object.get(key) {
                    None => Ok(None),
                    Some(Value::Object(patch)) => Ok(Some(patch)),
                    Some(_) => Err(format!("response member '{key}' is not an object")),
                };
                let global = member("global")?;
                let local = member("local")?;
                if let Some(patch) = global {
                    variables.merge(ScopeKind::Global, patch);
                }
                if let Some(patch) = local {
                    variables.merge(ScopeKind::Local, patch);
                }
            }
            ResponseMerge::Ignore => {}
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal: persistence.
    // -----------------------------------------------------------------------

    /// Persist `execution` (and the step's history) as one versioned commit.
    async fn commit(
        &self,
        execution: &mut Execution,
        history: Option<&History>,
    ) -> Result<(), EngineError> {
        execution.updated_at = self.clock.now();
        let expected = execution.version;
        execution.version += 1;

        let row = execution.to_row()?;
        let history_row = history.map(History::to_row).transpose()?;

        if let Err(err) = self.repository.commit_step(&row, expected, history_row.as_ref()).await {
            execution.version = expected;
            return Err(err.into());
        }
        Ok(())
    }

    /// Mark the execution failed at its current position and persist it.
    ///
    /// Returns the error to report: `err`, or the persistence error if the
    /// failed state could not be saved.
    async fn fail(
        &self,
        execution: &mut Execution,
        history: Option<History>,
        err: EngineError,
    ) -> EngineError {
        error!("execution {} failed: {}", execution.id, err);
        execution.state = ExecutionStatus::Failed;
        execution.failure = Some(err.to_string());

        match self.commit(execution, history.as_ref()).await {
            Ok(()) => err,
            Err(persist_err) => {
                error!("could not persist failure of execution {}: {}", execution.id, persist_err);
                persist_err
            }
        }
    }
}
