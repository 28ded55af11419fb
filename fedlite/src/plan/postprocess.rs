// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Post-processing of planner output
//!
//! Brings a fetch tree into the canonical form the loader executes: a
//! sequence of steps, each step a single fetch or a parallel group of
//! fetches that do not read each other's data.
//!
//! When the planner filled in `depends_on`, its fetch ids are kept and the
//! steps follow those dependencies alone, so independent fetches end up in
//! the same step whatever tree the planner nested them in. Otherwise the
//! tree itself is the dependency graph: a fetch waits for whatever precedes
//! it in a sequence, and branches of a parallel group wait for nothing but
//! what preceded the group. Identical fetches inside one step are sent once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::debug;

use super::{GraphQLResponse, Plan, SubscriptionResponsePlan, SynchronousResponsePlan};
use crate::error::OperationReport;
use crate::resolve::fetch::{FetchItem, FetchTreeNode};

#[derive(Debug, Default, Clone)]
pub struct PostProcessor {
    /// Keep duplicate fetches inside parallel groups
    pub disable_deduplication: bool,
}

/// A fetch plus the positions of the fetches it waits for
struct PlannedFetch {
    item: FetchItem,
    after: Vec<usize>,
}

impl PostProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&self, plan: Plan) -> Result<Plan, OperationReport> {
        match plan {
            Plan::Synchronous(sync) => {
                let mut sync = Arc::try_unwrap(sync).unwrap_or_else(|shared| (*shared).clone());
                self.process_response(&mut sync.response)?;
                Ok(Plan::Synchronous(Arc::new(SynchronousResponsePlan {
                    response: sync.response,
                })))
            }
            Plan::Subscription(subscription) => {
                let mut subscription =
                    Arc::try_unwrap(subscription).unwrap_or_else(|shared| (*shared).clone());
                self.process_response(&mut subscription.response)?;
                Ok(Plan::Subscription(Arc::new(SubscriptionResponsePlan {
                    trigger: subscription.trigger,
                    response: subscription.response,
                })))
            }
            unsupported @ Plan::Unsupported { .. } => Ok(unsupported),
        }
    }

    fn process_response(&self, response: &mut GraphQLResponse) -> Result<(), OperationReport> {
        let tree = std::mem::replace(&mut response.fetches, FetchTreeNode::empty());
        let mut planned = Vec::new();
        collect(tree, Vec::new(), &mut planned);
        resolve_dependencies(&mut planned)?;
        let steps = order_by_dependencies(&planned)?;
        debug!(
            "post-processed {} fetches into {} steps",
            planned.len(),
            steps.len()
        );
        response.fetches = self.build_tree(planned, steps);
        Ok(())
    }

    fn build_tree(&self, planned: Vec<PlannedFetch>, steps: Vec<Vec<usize>>) -> FetchTreeNode {
        let mut slots: Vec<Option<FetchItem>> = planned.into_iter().map(|p| Some(p.item)).collect();
        let mut nodes = Vec::with_capacity(steps.len());
        for step in steps {
            let mut group: Vec<FetchItem> = Vec::with_capacity(step.len());
            for position in step {
                let Some(item) = slots[position].take() else {
                    continue;
                };
                let duplicate = !self.disable_deduplication
                    && group.iter().any(|existing| {
                        existing.fetch_path == item.fetch_path && existing.fetch.same_request(&item.fetch)
                    });
                if duplicate {
                    debug!(
                        "dropping duplicate fetch to '{}'",
                        item.fetch.info().data_source_name
                    );
                    continue;
                }
                group.push(item);
            }
            if group.len() == 1 {
                if let Some(only) = group.pop() {
                    nodes.push(FetchTreeNode::Single(only));
                }
            } else if !group.is_empty() {
                nodes.push(FetchTreeNode::Parallel(
                    group.into_iter().map(FetchTreeNode::Single).collect(),
                ));
            }
        }
        if nodes.len() == 1 {
            if let Some(only) = nodes.pop() {
                return only;
            }
        }
        FetchTreeNode::Sequence(nodes)
    }
}

/// Flatten `node` into `out`, recording the tree order as dependencies
///
/// Returns the positions a fetch following `node` has to wait for.
fn collect(node: FetchTreeNode, after: Vec<usize>, out: &mut Vec<PlannedFetch>) -> Vec<usize> {
    match node {
        FetchTreeNode::Single(item) => {
            let position = out.len();
            out.push(PlannedFetch { item, after });
            vec![position]
        }
        FetchTreeNode::Sequence(children) => {
            let mut current = after;
            for child in children {
                current = collect(child, current, out);
            }
            current
        }
        FetchTreeNode::Parallel(children) => {
            if children.is_empty() {
                return after;
            }
            let mut exits = Vec::new();
            for child in children {
                exits.extend(collect(child, after.clone(), out));
            }
            exits
        }
    }
}

/// Settle which fetches each fetch waits for
///
/// Planner-supplied `depends_on` replaces the tree order. Without it the tree
/// order is written back into `depends_on`, renumbering only when the
/// planner left the ids ambiguous.
fn resolve_dependencies(planned: &mut [PlannedFetch]) -> Result<(), OperationReport> {
    let mut ids = HashSet::with_capacity(planned.len());
    let unique = planned
        .iter()
        .all(|p| ids.insert(p.item.fetch.dependencies().fetch_id));
    let declared = planned
        .iter()
        .any(|p| !p.item.fetch.dependencies().depends_on.is_empty());

    if declared {
        if !unique {
            return Err(OperationReport::from_message(
                "Fetch ids must be unique when fetches declare dependencies.",
            ));
        }
        let positions: HashMap<usize, usize> = planned
            .iter()
            .enumerate()
            .map(|(position, p)| (p.item.fetch.dependencies().fetch_id, position))
            .collect();
        for p in planned.iter_mut() {
            let dependencies = p.item.fetch.dependencies();
            let mut after = Vec::with_capacity(dependencies.depends_on.len());
            for id in &dependencies.depends_on {
                match positions.get(id) {
                    Some(&position) => after.push(position),
                    None => {
                        return Err(OperationReport::from_message(format!(
                            "Fetch {} depends on unknown fetch {}.",
                            dependencies.fetch_id, id
                        )))
                    }
                }
            }
            p.after = after;
        }
        return Ok(());
    }

    if !unique {
        for (position, p) in planned.iter_mut().enumerate() {
            p.item.fetch.dependencies_mut().fetch_id = position;
        }
    }
    let ids: Vec<usize> = planned
        .iter()
        .map(|p| p.item.fetch.dependencies().fetch_id)
        .collect();
    for p in planned.iter_mut() {
        let depends_on = p.after.iter().map(|&position| ids[position]).collect();
        p.item.fetch.dependencies_mut().depends_on = depends_on;
    }
    Ok(())
}

/// Group fetches into steps; a fetch joins the first step after all of the
/// fetches it waits for
fn order_by_dependencies(planned: &[PlannedFetch]) -> Result<Vec<Vec<usize>>, OperationReport> {
    let mut placed = vec![false; planned.len()];
    let mut remaining = planned.len();
    let mut steps = Vec::new();
    while remaining > 0 {
        let ready: Vec<usize> = (0..planned.len())
            .filter(|&position| {
                !placed[position] && planned[position].after.iter().all(|&dep| placed[dep])
            })
            .collect();
        if ready.is_empty() {
            return Err(OperationReport::from_message(
                "Fetch dependencies contain a cycle.",
            ));
        }
        for &position in &ready {
            placed[position] = true;
        }
        remaining -= ready.len();
        steps.push(ready);
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::fetch::{Fetch, FetchInfo, FetchPathElement, InputTemplate, SingleFetch};
    use crate::resolve::node::Object;

    fn fetch(source: &str, query: &str) -> FetchTreeNode {
        FetchTreeNode::single(FetchItem::root(Fetch::Single(SingleFetch::new(
            FetchInfo::new(source, source),
            InputTemplate::new(query),
        ))))
    }

    fn process(tree: FetchTreeNode) -> Result<FetchTreeNode, OperationReport> {
        let plan = Plan::synchronous(GraphQLResponse::new(tree, Object::default()));
        match PostProcessor::new().process(plan)? {
            Plan::Synchronous(sync) => Ok(sync.response.fetches.clone()),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_nested_sequences_are_flattened() {
        let tree = FetchTreeNode::sequence(vec![
            fetch("a", "{a}"),
            FetchTreeNode::sequence(vec![fetch("b", "{b}"), fetch("c", "{c}")]),
        ]);
        let FetchTreeNode::Sequence(children) = process(tree).unwrap() else {
            panic!("expected sequence");
        };
        assert_eq!(children.len(), 3);
        let ids: Vec<usize> = children
            .iter()
            .map(|c| match c {
                FetchTreeNode::Single(item) => item.fetch.dependencies().fetch_id,
                _ => usize::MAX,
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_single_child_parallel_is_unwrapped() {
        let tree = FetchTreeNode::parallel(vec![fetch("a", "{a}")]);
        assert!(matches!(process(tree).unwrap(), FetchTreeNode::Single(_)));
    }

    #[test]
    fn test_duplicate_parallel_fetches_are_merged() {
        let tree = FetchTreeNode::parallel(vec![fetch("a", "{a}"), fetch("a", "{a}"), fetch("b", "{b}")]);
        let FetchTreeNode::Parallel(children) = process(tree).unwrap() else {
            panic!("expected parallel");
        };
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn test_same_request_at_different_paths_is_kept() {
        let mut other = FetchItem::root(Fetch::Single(SingleFetch::new(
            FetchInfo::new("a", "a"),
            InputTemplate::new("{a}"),
        )));
        other.fetch_path = vec![FetchPathElement::Object("me".to_string())];
        let tree = FetchTreeNode::parallel(vec![fetch("a", "{a}"), FetchTreeNode::single(other)]);
        let FetchTreeNode::Parallel(children) = process(tree).unwrap() else {
            panic!("expected parallel");
        };
        assert_eq!(children.len(), 2);
    }

    fn planned(source: &str, id: usize, depends_on: &[usize]) -> FetchTreeNode {
        match fetch(source, &format!("{{{}}}", source)) {
            FetchTreeNode::Single(item) => FetchTreeNode::single(item.with_dependencies(id, depends_on)),
            other => other,
        }
    }

    /// Data source names per step
    fn steps(tree: &FetchTreeNode) -> Vec<Vec<String>> {
        let names = |node: &FetchTreeNode| -> Vec<String> {
            node.items()
                .iter()
                .map(|item| item.fetch.info().data_source_id.clone())
                .collect()
        };
        match tree {
            FetchTreeNode::Sequence(children) => children.iter().map(names).collect(),
            other => vec![names(other)],
        }
    }

    #[test]
    fn test_declared_dependencies_group_independent_fetches() {
        let tree = FetchTreeNode::sequence(vec![
            planned("users", 0, &[]),
            planned("products", 1, &[]),
            planned("reviews", 2, &[0]),
        ]);
        let processed = process(tree).unwrap();
        assert_eq!(
            steps(&processed),
            vec![
                vec!["users".to_string(), "products".to_string()],
                vec!["reviews".to_string()],
            ]
        );
        let FetchTreeNode::Sequence(children) = &processed else {
            panic!("expected sequence");
        };
        assert!(matches!(children[0], FetchTreeNode::Parallel(_)));
    }

    #[test]
    fn test_planner_fetch_ids_are_kept() {
        let tree = FetchTreeNode::sequence(vec![
            planned("reviews", 30, &[10]),
            planned("users", 10, &[]),
            planned("products", 20, &[]),
        ]);
        let processed = process(tree).unwrap();
        assert_eq!(
            steps(&processed),
            vec![
                vec!["users".to_string(), "products".to_string()],
                vec!["reviews".to_string()],
            ]
        );
        let ids: Vec<(usize, Vec<usize>)> = processed
            .items()
            .iter()
            .map(|item| {
                let dependencies = item.fetch.dependencies();
                (dependencies.fetch_id, dependencies.depends_on.clone())
            })
            .collect();
        assert_eq!(ids, vec![(10, vec![]), (20, vec![]), (30, vec![10])]);
    }

    #[test]
    fn test_parallel_branches_with_entity_fetches_run_side_by_side() {
        let tree = FetchTreeNode::parallel(vec![
            FetchTreeNode::sequence(vec![fetch("users", "{users}"), fetch("users_entities", "{u}")]),
            FetchTreeNode::sequence(vec![fetch("products", "{products}"), fetch("products_entities", "{p}")]),
        ]);
        let processed = process(tree).unwrap();
        assert_eq!(
            steps(&processed),
            vec![
                vec!["users".to_string(), "products".to_string()],
                vec!["users_entities".to_string(), "products_entities".to_string()],
            ]
        );
        // Tree order is written back as dependencies
        let dependencies: Vec<Vec<usize>> = processed
            .items()
            .iter()
            .map(|item| item.fetch.dependencies().depends_on.clone())
            .collect();
        assert_eq!(dependencies, vec![vec![], vec![], vec![0], vec![2]]);
    }

    #[test]
    fn test_fetch_after_parallel_group_waits_for_every_branch() {
        let tree = FetchTreeNode::sequence(vec![
            FetchTreeNode::parallel(vec![fetch("a", "{a}"), fetch("b", "{b}")]),
            fetch("c", "{c}"),
        ]);
        let processed = process(tree).unwrap();
        assert_eq!(steps(&processed).len(), 2);
        let last = processed.items()[2].fetch.dependencies().clone();
        assert_eq!(last.depends_on, vec![0, 1]);
    }

    #[test]
    fn test_invalid_dependencies_are_rejected() {
        let unknown = FetchTreeNode::sequence(vec![planned("a", 0, &[]), planned("b", 1, &[7])]);
        assert!(process(unknown).is_err());

        let cycle = FetchTreeNode::sequence(vec![planned("a", 0, &[1]), planned("b", 1, &[0])]);
        assert!(process(cycle).is_err());

        let ambiguous = FetchTreeNode::sequence(vec![planned("a", 3, &[]), planned("b", 3, &[3])]);
        assert!(process(ambiguous).is_err());
    }

    #[test]
    fn test_empty_tree_stays_empty() {
        assert_eq!(process(FetchTreeNode::empty()).unwrap(), FetchTreeNode::empty());
    }
}
