//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what workflows, executions and
//! history records look like in memory. They map onto the row structs of the
//! `db` crate through the conversions at the bottom of this file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use db::models::{ExecutionRow, ExecutionStatus, HistoryRow, WorkflowRow};
use invoker::{Payload, Service};

use crate::EngineError;
use crate::variables::{Scope, Variables};

// ---------------------------------------------------------------------------
// ControlDefinition
// ---------------------------------------------------------------------------

/// One node of a workflow's process tree, as stored and exchanged.
///
/// `type` is kept as a plain string here so definitions round-trip untouched;
/// it is checked against the known kinds when the tree is compiled
/// (see [`ControlTree`](crate::tree::ControlTree)).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    /// Name of the service invoked when the control is stepped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Boolean expression of `if` and `loop` controls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub controls: Vec<ControlDefinition>,
}

impl ControlDefinition {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            service: None,
            expression: None,
            controls: Vec::new(),
        }
    }

    /// A `go` control invoking `service`.
    pub fn go(service: impl Into<String>) -> Self {
        Self::new("go").with_service(service)
    }

    pub fn if_then(expression: impl Into<String>, controls: Vec<ControlDefinition>) -> Self {
        Self::new("if").with_expression(expression).with_children(controls)
    }

    pub fn loop_while(expression: impl Into<String>, controls: Vec<ControlDefinition>) -> Self {
        Self::new("loop").with_expression(expression).with_children(controls)
    }

    pub fn wait() -> Self {
        Self::new("wait")
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    pub fn with_children(mut self, controls: Vec<ControlDefinition>) -> Self {
        self.controls = controls;
        self
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// What a caller submits to store a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub controls: Vec<ControlDefinition>,
    #[serde(default)]
    pub services: Vec<Service>,
}

impl WorkflowDefinition {
    pub fn new(
        name: impl Into<String>,
        controls: Vec<ControlDefinition>,
        services: Vec<Service>,
    ) -> Self {
        Self { name: name.into(), controls, services }
    }
}

/// A stored, immutable workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub controls: Vec<ControlDefinition>,
    pub services: Vec<Service>,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(definition: WorkflowDefinition, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: definition.name,
            controls: definition.controls,
            services: definition.services,
            created_at,
        }
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Bookkeeping for a `loop` control whose body is being executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopFrame {
    /// Position of the loop control.
    pub control: usize,
    /// Iterations entered so far.
    pub iterations: u32,
    /// Local scope as it was when the loop was entered.
    pub entry_locals: Scope,
}

/// The mutable run-time cursor over a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub state: ExecutionStatus,
    /// Index into the pre-order flattening of the control tree.
    pub current_control: usize,
    pub variables: Variables,
    /// Active loops, innermost last.
    pub loops: Vec<LoopFrame>,
    /// Step number the next history record receives.
    pub next_step: u32,
    /// Why the execution failed, once it has.
    pub failure: Option<String>,
    pub version: i64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Execution {
    /// A fresh execution at position 0.
    pub fn new(workflow_id: Uuid, variables: Variables, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            state: ExecutionStatus::Running,
            current_control: 0,
            variables,
            loops: Vec::new(),
            next_step: 0,
            failure: None,
            version: 0,
            started_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// One audit record per executed `go` or service step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_number: u32,
    /// Position of the control that produced the step.
    pub control: usize,
    pub service: Option<String>,
    pub request: Payload,
    pub response: Payload,
    /// Variable state after the step.
    pub local_snapshot: Scope,
    pub global_snapshot: Scope,
    pub failure: Option<String>,
    pub executed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Row conversions
// ---------------------------------------------------------------------------

fn to_i32<T: TryInto<i32> + Copy + std::fmt::Display>(value: T, what: &str) -> Result<i32, EngineError> {
    value
        .try_into()
        .map_err(|_| EngineError::CorruptRecord(format!("{what} {value} out of range")))
}

fn from_i32<T: TryFrom<i32>>(value: i32, what: &str) -> Result<T, EngineError> {
    T::try_from(value).map_err(|_| EngineError::CorruptRecord(format!("negative {what} {value}")))
}

impl Workflow {
    pub fn to_row(&self) -> WorkflowRow {
        WorkflowRow {
            id: self.id,
            name: self.name.clone(),
            definition: json!({
                "controls": self.controls,
                "services": self.services,
            }),
            created_at: self.created_at,
        }
    }
}

#[derive(Deserialize)]
struct StoredDefinition {
    #[serde(default)]
    controls: Vec<ControlDefinition>,
    #[serde(default)]
    services: Vec<Service>,
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = EngineError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        let stored: StoredDefinition = serde_json::from_value(row.definition)?;
        Ok(Self {
            id: row.id,
            name: row.name,
            controls: stored.controls,
            services: stored.services,
            created_at: row.created_at,
        })
    }
}

impl Execution {
    pub fn to_row(&self) -> Result<ExecutionRow, EngineError> {
        Ok(ExecutionRow {
            id: self.id,
            workflow_id: self.workflow_id,
            status: self.state.to_string(),
            current_control: to_i32(self.current_control, "control position")?,
            global_variables: self.variables.global.to_value(),
            local_variables: self.variables.local.to_value(),
            loop_frames: serde_json::to_value(&self.loops)?,
            next_step: to_i32(self.next_step, "step number")?,
            failure: self.failure.clone(),
            version: self.version,
            started_at: self.started_at,
            updated_at: self.updated_at,
        })
    }
}

impl TryFrom<ExecutionRow> for Execution {
    type Error = EngineError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let state = row.status.parse::<ExecutionStatus>().map_err(EngineError::CorruptRecord)?;
        Ok(Self {
            id: row.id,
            workflow_id: row.workflow_id,
            state,
            current_control: from_i32(row.current_control, "control position")?,
            variables: Variables::new(
                Scope::from_value(row.global_variables)?,
                Scope::from_value(row.local_variables)?,
            ),
            loops: serde_json::from_value(row.loop_frames)?,
            next_step: from_i32(row.next_step, "step number")?,
            failure: row.failure,
            version: row.version,
            started_at: row.started_at,
            updated_at: row.updated_at,
        })
    }
}

impl History {
    pub fn to_row(&self) -> Result<HistoryRow, EngineError> {
        Ok(HistoryRow {
            id: self.id,
            execution_id: self.execution_id,
            step_number: to_i32(self.step_number, "step number")?,
            control_index: to_i32(self.control, "control position")?,
            service: self.service.clone(),
            request_data: self.request.data.clone(),
            request_mime: self.request.mime.clone(),
            response_data: self.response.data.clone(),
            response_mime: self.response.mime.clone(),
            local_snapshot: self.local_snapshot.to_value(),
            global_snapshot: self.global_snapshot.to_value(),
            failure: self.failure.clone(),
            executed_at: self.executed_at,
        })
    }
}

impl TryFrom<HistoryRow> for History {
    type Error = EngineError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            execution_id: row.execution_id,
            step_number: from_i32(row.step_number, "step number")?,
            control: from_i32(row.control_index, "control position")?,
            service: row.service,
            request: Payload::new(row.request_data, row.request_mime),
            response: Payload::new(row.response_data, row.response_mime),
            local_snapshot: Scope::from_value(row.local_snapshot)?,
            global_snapshot: Scope::from_value(row.global_snapshot)?,
            failure: row.failure,
            executed_at: row.executed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::ScopeKind;

    #[test]
    fn definition_parses_the_stored_shape() {
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "name": "branch",
            "controls": [
                { "type": "if", "expression": "x > 0", "controls": [
                    { "type": "go", "service": "a" }
                ]}
            ],
            "services": [{ "name": "a", "url": "http://a.invalid" }]
        }))
        .unwrap();

        assert_eq!(
            definition.controls,
            vec![ControlDefinition::if_then("x > 0", vec![ControlDefinition::go("a")])]
        );
        assert_eq!(definition.services[0].method, "POST");
    }

    #[test]
    fn workflow_survives_its_row() {
        let workflow = Workflow::new(
            WorkflowDefinition::new(
                "ping",
                vec![ControlDefinition::go("echo"), ControlDefinition::wait()],
                vec![Service::json("echo", "http://echo.invalid")],
            ),
            Utc::now(),
        );

        let back = Workflow::try_from(workflow.to_row()).unwrap();
        assert_eq!(back, workflow);
    }

    #[test]
    fn execution_survives_its_row() {
        let mut exec = Execution::new(Uuid::new_v4(), Variables::default(), Utc::now());
        exec.variables.write(ScopeKind::Local, "x", json!(1));
        exec.current_control = 3;
        exec.next_step = 2;
        exec.loops.push(LoopFrame { control: 1, iterations: 2, entry_locals: Scope::new() });
        exec.state = ExecutionStatus::Suspended;

        let back = Execution::try_from(exec.to_row().unwrap()).unwrap();
        assert_eq!(back, exec);
    }

    #[test]
    fn unknown_status_is_a_corrupt_record() {
        let mut row = Execution::new(Uuid::new_v4(), Variables::default(), Utc::now())
            .to_row()
            .unwrap();
        row.status = "sleeping".into();
        assert!(matches!(Execution::try_from(row), Err(EngineError::CorruptRecord(_))));
    }
}
