//! Declared deployment graphs and their structural validation.

pub mod action;
pub mod planner;

use std::{collections::HashMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::errors::{GraphError, ScriptError};

pub use action::{Action, ActionKind, Arg, ResultField, Target};
pub use planner::{ExecutionPlan, Planner};

/// A named, versioned set of actions with dependency edges.
///
/// Declaration order is kept: it breaks ties when planning.
#[derive(Debug, Clone, Default)]
pub struct ActionGraph {
    name: String,
    version: u32,
    actions: Vec<Action>,
    index: HashMap<String, usize>,
}

/// On-disk form of a graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphFile {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub actions: Vec<Action>,
}

fn default_version() -> u32 {
    1
}

impl ActionGraph {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            ..Default::default()
        }
    }

    /// Read a YAML graph declaration
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let to_err = |reason: String| ScriptError::GraphFile {
            path: path.display().to_string(),
            reason,
        };
        let content = fs::read_to_string(path).map_err(|e| to_err(e.to_string()))?;
        let file: GraphFile = serde_yaml::from_str(&content).map_err(|e| to_err(e.to_string()))?;
        Ok(Self::try_from(file)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Action> {
        self.index.get(id).map(|&i| &self.actions[i])
    }

    /// Declaration position of `id`
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Add an action, rejecting an id that is already declared
    pub fn add_action(&mut self, action: Action) -> Result<(), GraphError> {
        if self.index.contains_key(&action.id) {
            return Err(GraphError::DuplicateId(action.id));
        }
        self.index.insert(action.id.clone(), self.actions.len());
        self.actions.push(action);
        Ok(())
    }

    /// Identifier of the journal run for this graph on a given chain
    pub fn run_id(&self, chain_id: u64) -> String {
        format!("{}@v{}.chain-{}", self.name, self.version, chain_id)
    }

    /// Dependency positions (explicit and implicit) of each action, deduplicated and sorted.
    pub(crate) fn edges(&self) -> Result<Vec<Vec<usize>>, GraphError> {
        self.actions
            .iter()
            .map(|action| {
                let mut deps = action
                    .dependencies()
                    .map(|dep| {
                        self.position(dep).ok_or_else(|| GraphError::UnknownReference {
                            action: action.id.clone(),
                            reference: dep.to_string(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                deps.sort_unstable();
                deps.dedup();
                Ok(deps)
            })
            .collect()
    }

    /// Check references and acyclicity. Pure, can be called any number of times.
    pub fn validate(&self) -> Result<(), GraphError> {
        let edges = self.edges()?;
        self.check_references()?;
        if let Some(cycle) = self.find_cycle(&edges) {
            return Err(GraphError::Cycle(cycle));
        }
        Ok(())
    }

    /// A referenced action must be able to produce the field asked for
    fn check_references(&self) -> Result<(), GraphError> {
        for action in &self.actions {
            for (reference, field) in action.references() {
                // edges() already rejected unknown ids
                let Some(referenced) = self.get(reference) else {
                    continue;
                };
                let reason = match field {
                    ResultField::Address if !referenced.is_deploy() => {
                        "only deploy actions produce an address"
                    }
                    ResultField::ReturnData if referenced.is_deploy() => {
                        "deploy actions have no return data"
                    }
                    _ => continue,
                };
                return Err(GraphError::InvalidReference {
                    action: action.id.clone(),
                    reference: reference.to_string(),
                    reason: reason.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Depth-first search in declaration order, returning the first cycle found as
    /// `[a, b, ..., a]` where each entry depends on the next.
    fn find_cycle(&self, edges: &[Vec<usize>]) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        fn visit(
            node: usize,
            edges: &[Vec<usize>],
            marks: &mut [Mark],
            stack: &mut Vec<usize>,
        ) -> Option<Vec<usize>> {
            marks[node] = Mark::OnStack;
            stack.push(node);
            for &dep in &edges[node] {
                match marks[dep] {
                    Mark::OnStack => {
                        let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                        let mut cycle = stack[start..].to_vec();
                        cycle.push(dep);
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        if let Some(cycle) = visit(dep, edges, marks, stack) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            stack.pop();
            marks[node] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::Unvisited; self.actions.len()];
        let mut stack = Vec::new();
        for node in 0..self.actions.len() {
            if marks[node] == Mark::Unvisited {
                if let Some(cycle) = visit(node, edges, &mut marks, &mut stack) {
                    return Some(
                        cycle
                            .into_iter()
                            .map(|i| self.actions[i].id.clone())
                            .collect(),
                    );
                }
            }
        }
        None
    }
}

impl TryFrom<GraphFile> for ActionGraph {
    type Error = GraphError;

    fn try_from(file: GraphFile) -> Result<Self, Self::Error> {
        let mut graph = ActionGraph::new(file.name, file.version);
        for action in file.actions {
            graph.add_action(action)?;
        }
        Ok(graph)
    }
}
