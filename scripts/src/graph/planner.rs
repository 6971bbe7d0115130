//! Linearisation of a validated graph into the order actions are executed in.

use std::{cmp::Reverse, collections::BinaryHeap};

use crate::{
    errors::GraphError,
    graph::{Action, ActionGraph},
};

/// Action ids in execution order. Every action comes strictly after all of its dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    order: Vec<String>,
}

impl ExecutionPlan {
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, cursor: usize) -> Option<&str> {
        self.order.get(cursor).map(String::as_str)
    }

    /// Resolve the planned ids back to their actions
    pub fn actions<'g>(&'g self, graph: &'g ActionGraph) -> impl Iterator<Item = &'g Action> {
        self.order.iter().filter_map(|id| graph.get(id))
    }
}

/// Deterministic topological sort.
///
/// Among the actions whose dependencies are all placed, the earliest declared goes first,
/// so an unchanged graph always yields the same plan. Journal resumption relies on that.
pub struct Planner;

impl Planner {
    pub fn plan(graph: &ActionGraph) -> Result<ExecutionPlan, GraphError> {
        graph.validate()?;
        let edges = graph.edges()?;

        let count = graph.len();
        let mut pending_deps: Vec<usize> = edges.iter().map(Vec::len).collect();
        let mut dependents = vec![Vec::new(); count];
        for (node, deps) in edges.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(node);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = pending_deps
            .iter()
            .enumerate()
            .filter(|(_, &n)| n == 0)
            .map(|(node, _)| Reverse(node))
            .collect();

        let actions = graph.actions();
        let mut order = Vec::with_capacity(count);
        while let Some(Reverse(node)) = ready.pop() {
            order.push(actions[node].id.clone());
            for &dependent in &dependents[node] {
                pending_deps[dependent] -= 1;
                if pending_deps[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        // validate() already rejected cycles, so every action is placed
        debug_assert_eq!(order.len(), count);
        Ok(ExecutionPlan { order })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Arg, Target};

    fn graph(actions: Vec<Action>) -> ActionGraph {
        let mut graph = ActionGraph::new("test", 1);
        for action in actions {
            graph.add_action(action).unwrap();
        }
        graph
    }

    #[test]
    fn orders_chain_of_calls_after_deploy() {
        let graph = graph(vec![
            Action::deploy("A", "Token"),
            Action::invoke("B", Target::Action("A".into()), "setup"),
            Action::invoke("C", Target::Action("A".into()), "finish").after(["B"]),
        ]);
        let plan = Planner::plan(&graph).unwrap();
        assert_eq!(plan.ids(), ["A", "B", "C"]);
    }

    #[test]
    fn dependencies_win_over_declaration_order() {
        let graph = graph(vec![
            Action::invoke("register", Target::Action("registry".into()), "register"),
            Action::deploy("token", "Token"),
            Action::deploy("registry", "Registry").with_args([Arg::address_of("token")]),
        ]);
        let plan = Planner::plan(&graph).unwrap();
        assert_eq!(plan.ids(), ["token", "registry", "register"]);
    }

    #[test]
    fn independent_actions_keep_declaration_order() {
        let graph = graph(vec![Action::deploy("D1", "One"), Action::deploy("D2", "Two")]);
        let first = Planner::plan(&graph).unwrap();
        for _ in 0..10 {
            assert_eq!(Planner::plan(&graph).unwrap(), first);
        }
        assert_eq!(first.ids(), ["D1", "D2"]);
    }

    #[test]
    fn refuses_to_plan_a_cycle() {
        let graph = graph(vec![
            Action::deploy("a", "A").after(["b"]),
            Action::deploy("b", "B").with_args([Arg::address_of("a")]),
        ]);
        assert!(matches!(Planner::plan(&graph), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn empty_graph_has_empty_plan() {
        let plan = Planner::plan(&ActionGraph::new("empty", 1)).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn plan_resolves_back_to_actions() {
        let graph = graph(vec![
            Action::deploy("late", "Late").after(["early"]),
            Action::deploy("early", "Early"),
        ]);
        let plan = Planner::plan(&graph).unwrap();
        let contracts: Vec<_> = plan.actions(&graph).map(|a| a.id.as_str()).collect();
        assert_eq!(contracts, ["early", "late"]);
    }
}
