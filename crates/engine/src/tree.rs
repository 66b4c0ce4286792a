//! Control tree compilation: run this before storing or executing a
//! workflow.
//!
//! The nested [`ControlDefinition`]s are flattened into an arena in
//! pre-order, depth-first: a node's children directly follow it, and the
//! whole subtree of the node at `p` occupies `p..subtree_end`. An
//! execution's `current_control` indexes into this arena.
//!
//! Rules enforced:
//! 1. Every control's `type` is one of `go`, `if`, `loop`, `wait`.
//! 2. `if` and `loop` controls carry a non-empty expression.
//! 3. Service names are unique within the workflow.
//! 4. Every service a control references is defined by the workflow.

use std::collections::HashMap;

use invoker::Service;

use crate::EngineError;
use crate::models::{ControlDefinition, Workflow};

/// The closed set of control kinds with their kind-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlKind {
    Go,
    If { expression: String },
    Loop { expression: String },
    Wait,
}

impl ControlKind {
    fn parse(definition: &ControlDefinition, path: &str) -> Result<Self, EngineError> {
        let expression = |kind: &'static str| {
            definition
                .expression
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_owned)
                .ok_or_else(|| EngineError::MissingExpression { kind, path: path.to_owned() })
        };

        match definition.kind.as_str() {
            "go" => Ok(Self::Go),
            "if" => Ok(Self::If { expression: expression("if")? }),
            "loop" => Ok(Self::Loop { expression: expression("loop")? }),
            "wait" => Ok(Self::Wait),
            other => Err(EngineError::InvalidControlKind {
                kind: other.to_owned(),
                path: path.to_owned(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Go => "go",
            Self::If { .. } => "if",
            Self::Loop { .. } => "loop",
            Self::Wait => "wait",
        }
    }
}

/// One arena slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlNode {
    pub kind: ControlKind,
    pub service: Option<String>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// First position after this node's subtree.
    pub subtree_end: usize,
    pub depth: usize,
}

/// A workflow's controls flattened in pre-order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlTree {
    nodes: Vec<ControlNode>,
}

impl ControlTree {
    /// Check and flatten a list of root controls.
    ///
    /// # Errors
    /// - [`EngineError::InvalidControlKind`] for an unknown `type`.
    /// - [`EngineError::MissingExpression`] for an `if`/`loop` without one.
    pub fn build(controls: &[ControlDefinition]) -> Result<Self, EngineError> {
        let mut nodes = Vec::new();
        for (i, control) in controls.iter().enumerate() {
            push_subtree(&mut nodes, control, None, 0, format!("controls[{i}]"))?;
        }
        Ok(Self { nodes })
    }

    pub fn get(&self, position: usize) -> Option<&ControlNode> {
        self.nodes.get(position)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ControlNode)> {
        self.nodes.iter().enumerate()
    }

    /// One indented line per control, in traversal order.
    pub fn outline(&self) -> Vec<String> {
        self.iter()
            .map(|(position, node)| {
                let mut line = format!("{position:>3} {}{}", "  ".repeat(node.depth), node.kind.name());
                match &node.kind {
                    ControlKind::If { expression } | ControlKind::Loop { expression } => {
                        line.push_str(&format!(" ({expression})"));
                    }
                    ControlKind::Go | ControlKind::Wait => {}
                }
                if let Some(service) = &node.service {
                    line.push_str(&format!(" -> {service}"));
                }
                line
            })
            .collect()
    }
}

fn push_subtree(
    nodes: &mut Vec<ControlNode>,
    definition: &ControlDefinition,
    parent: Option<usize>,
    depth: usize,
    path: String,
) -> Result<(), EngineError> {
    let kind = ControlKind::parse(definition, &path)?;
    let index = nodes.len();
    nodes.push(ControlNode {
        kind,
        service: definition.service.clone(),
        parent,
        children: Vec::with_capacity(definition.controls.len()),
        subtree_end: index + 1,
        depth,
    });

    for (i, child) in definition.controls.iter().enumerate() {
        let child_index = nodes.len();
        push_subtree(nodes, child, Some(index), depth + 1, format!("{path}.controls[{i}]"))?;
        nodes[index].children.push(child_index);
    }

    nodes[index].subtree_end = nodes.len();
    Ok(())
}

/// A workflow together with its checked control tree and service index.
///
/// Read-only once built; shared between every execution of the workflow.
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub workflow: Workflow,
    pub tree: ControlTree,
    services: HashMap<String, usize>,
}

impl CompiledWorkflow {
    /// # Errors
    /// Everything [`ControlTree::build`] rejects, plus
    /// [`EngineError::DuplicateService`] and [`EngineError::UnknownService`].
    pub fn compile(workflow: Workflow) -> Result<Self, EngineError> {
        let mut services = HashMap::with_capacity(workflow.services.len());
        for (i, service) in workflow.services.iter().enumerate() {
            if services.insert(service.name.clone(), i).is_some() {
                return Err(EngineError::DuplicateService(service.name.clone()));
            }
        }

        let tree = ControlTree::build(&workflow.controls)?;
        for (position, node) in tree.iter() {
            if let Some(service) = &node.service {
                if !services.contains_key(service) {
                    return Err(EngineError::UnknownService {
                        service: service.clone(),
                        path: format!("position {position}"),
                    });
                }
            }
        }

        Ok(Self { workflow, tree, services })
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name).map(|&i| &self.workflow.services[i])
    }
}
