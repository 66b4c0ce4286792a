//! `WorkflowEngine`: the operations the engine exposes to its caller.
//!
//! It owns the repository, the executor, the per-execution locks and a cache
//! of compiled workflows. Every operation that touches an execution holds
//! that execution's lock for its whole duration, service calls included, so
//! steps of one execution never interleave.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, instrument};
use uuid::Uuid;

use db::models::ExecutionStatus;
use db::{DbError, Repository};
use invoker::{RetryingInvoker, ServiceInvoker};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::executor::WorkflowExecutor;
use crate::locks::ExecutionLocks;
use crate::models::{Execution, History, Workflow, WorkflowDefinition};
use crate::tree::CompiledWorkflow;
use crate::variables::Variables;
use crate::EngineError;

pub struct WorkflowEngine {
    repository: Arc<dyn Repository>,
    executor: WorkflowExecutor,
    locks: ExecutionLocks,
    compiled: RwLock<HashMap<Uuid, Arc<CompiledWorkflow>>>,
    clock: Arc<dyn Clock>,
}

impl WorkflowEngine {
    /// Create an engine on the system clock.
    ///
    /// When `config.retry.max_retries` is non-zero the invoker is wrapped in
    /// a [`RetryingInvoker`].
    pub fn new(
        repository: Arc<dyn Repository>,
        invoker: Arc<dyn ServiceInvoker>,
        config: EngineConfig,
    ) -> Self {
        Self::with_clock(repository, invoker, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        repository: Arc<dyn Repository>,
        invoker: Arc<dyn ServiceInvoker>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let invoker: Arc<dyn ServiceInvoker> = if config.retry.max_retries > 0 {
            Arc::new(RetryingInvoker::new(invoker, config.retry.clone()))
        } else {
            invoker
        };

        Self {
            executor: WorkflowExecutor::new(repository.clone(), invoker, clock.clone(), config),
            repository,
            locks: ExecutionLocks::new(),
            compiled: RwLock::new(HashMap::new()),
            clock,
        }
    }

    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    /// Store a workflow and return its id.
    ///
    /// Idempotent by name: if a workflow with this name exists its id is
    /// returned and the stored definition is left as it was.
    ///
    /// # Errors
    /// Definition errors from [`CompiledWorkflow::compile`]; nothing is
    /// stored then.
    #[instrument(skip_all, fields(workflow = %definition.name))]
    pub async fn store_workflow(&self, definition: WorkflowDefinition) -> Result<Uuid, EngineError> {
        let workflow = Workflow::new(definition, self.clock.now());
        CompiledWorkflow::compile(workflow.clone())?;

        let stored = self.repository.store_workflow(workflow.to_row()).await?;
        if stored.id == workflow.id {
            info!("stored workflow '{}' as {}", stored.name, stored.id);
        } else {
            info!("workflow '{}' already stored as {}, definition kept", stored.name, stored.id);
        }
        Ok(stored.id)
    }

    pub async fn find_workflow_by_name(&self, name: &str) -> Result<Option<Workflow>, EngineError> {
        self.repository
            .find_workflow_by_name(name)
            .await?
            .map(Workflow::try_from)
            .transpose()
    }

    /// Delete a workflow, with its controls and services.
    ///
    /// Refused with [`EngineError::WorkflowInUse`] while executions reference
    /// it, so history records never point at a deleted service.
    #[instrument(skip(self))]
    pub async fn delete_workflow(&self, name: &str) -> Result<(), EngineError> {
        let row = self
            .repository
            .find_workflow_by_name(name)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(name.to_owned()))?;

        match self.repository.delete_workflow(row.id).await {
            Ok(()) => {}
            Err(DbError::InUse(_)) => return Err(EngineError::WorkflowInUse(name.to_owned())),
            Err(DbError::NotFound) => return Err(EngineError::WorkflowNotFound(name.to_owned())),
            Err(err) => return Err(err.into()),
        }

        self.compiled
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&row.id);
        info!("deleted workflow '{}' ({})", name, row.id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Create an execution of the named workflow, seeded with `variables`,
    /// and step it until it suspends or completes.
    ///
    /// # Errors
    /// - [`EngineError::WorkflowNotFound`] if no workflow has this name.
    /// - Definition errors if the stored tree does not compile; no execution
    ///   is created then.
    /// - The failing step's error; the execution exists and is failed.
    #[instrument(skip(self, variables))]
    pub async fn start_execution(&self, name: &str, variables: Variables) -> Result<Uuid, EngineError> {
        let row = self
            .repository
            .find_workflow_by_name(name)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(name.to_owned()))?;
        let workflow = self.compile_row(row)?;

        let mut execution = Execution::new(workflow.workflow.id, variables, self.clock.now());
        self.repository.create_execution(&execution.to_row()?).await?;
        info!("started execution {} of workflow '{}'", execution.id, name);

        let _guard = self.locks.acquire(execution.id).await;
        self.executor.run(&workflow, &mut execution).await?;
        Ok(execution.id)
    }

    /// Current state of an execution.
    pub async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, EngineError> {
        self.repository
            .get_execution(id)
            .await?
            .map(Execution::try_from)
            .transpose()
    }

    /// History of an execution, ordered by step number.
    pub async fn get_history(&self, id: Uuid) -> Result<Vec<History>, EngineError> {
        if self.repository.get_execution(id).await?.is_none() {
            return Err(EngineError::ExecutionNotFound(id));
        }
        self.repository
            .list_history(id)
            .await?
            .into_iter()
            .map(History::try_from)
            .collect()
    }

    /// Move a suspended execution past its `wait` control and keep stepping.
    ///
    /// # Errors
    /// [`EngineError::InvalidState`] unless the execution is suspended.
    #[instrument(skip(self))]
    pub async fn resume_execution(&self, id: Uuid) -> Result<ExecutionStatus, EngineError> {
        let _guard = self.locks.acquire(id).await;
        let mut execution = self.load_execution(id).await?;
        if execution.state != ExecutionStatus::Suspended {
            return Err(EngineError::InvalidState {
                execution_id: id,
                state: execution.state,
                operation: "resume",
            });
        }

        let workflow = self.compiled_for(execution.workflow_id).await?;
        self.executor.resume(&workflow, &mut execution).await?;
        Ok(execution.state)
    }

    /// Keep stepping a running execution from its persisted position, e.g.
    /// after the process driving it stopped.
    ///
    /// # Errors
    /// [`EngineError::InvalidState`] unless the execution is running.
    #[instrument(skip(self))]
    pub async fn continue_execution(&self, id: Uuid) -> Result<ExecutionStatus, EngineError> {
        let _guard = self.locks.acquire(id).await;
        let mut execution = self.load_execution(id).await?;
        if execution.state != ExecutionStatus::Running {
            return Err(EngineError::InvalidState {
                execution_id: id,
                state: execution.state,
                operation: "continue",
            });
        }

        let workflow = self.compiled_for(execution.workflow_id).await?;
        self.executor.run(&workflow, &mut execution).await?;
        Ok(execution.state)
    }

    /// Stop a running or suspended execution for good.
    #[instrument(skip(self))]
    pub async fn cancel_execution(&self, id: Uuid) -> Result<(), EngineError> {
        let _guard = self.locks.acquire(id).await;
        let mut execution = self.load_execution(id).await?;
        self.executor.cancel(&mut execution).await
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    async fn load_execution(&self, id: Uuid) -> Result<Execution, EngineError> {
        self.get_execution(id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(id))
    }

    fn cached(&self, id: Uuid) -> Option<Arc<CompiledWorkflow>> {
        self.compiled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn compile_row(&self, row: db::models::WorkflowRow) -> Result<Arc<CompiledWorkflow>, EngineError> {
        if let Some(workflow) = self.cached(row.id) {
            return Ok(workflow);
        }

        let compiled = Arc::new(CompiledWorkflow::compile(Workflow::try_from(row)?)?);
        self.compiled
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(compiled.workflow.id, compiled.clone());
        Ok(compiled)
    }

    async fn compiled_for(&self, workflow_id: Uuid) -> Result<Arc<CompiledWorkflow>, EngineError> {
        if let Some(workflow) = self.cached(workflow_id) {
            return Ok(workflow);
        }

        let row = self
            .repository
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))?;
        self.compile_row(row)
    }
}
