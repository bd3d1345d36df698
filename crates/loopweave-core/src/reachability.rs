//! Breadth-first reachability queries over a [`Graph`].
//!
//! Traversal follows every output slot of every visited node, not only the
//! loop branch, and never revisits a node, so cycles that do not involve the
//! goal terminate.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::Graph;

/// Does any directed path lead from `start` to `goal`?
///
/// `start == goal` counts as reached, which makes a node whose loop branch
/// targets itself satisfy the loop-back check.
pub fn reaches_back(graph: &Graph, start: &str, goal: &str) -> bool {
    if start == goal {
        return true;
    }

    let mut visited: HashSet<&str> = HashSet::from([start]);
    let mut queue: VecDeque<&str> = VecDeque::from([start]);

    while let Some(current) = queue.pop_front() {
        for next in graph.successors(current) {
            if next == goal {
                return true;
            }
            if visited.insert(next) {
                queue.push_back(next);
            }
        }
    }

    false
}

/// Shortest node sequence from `start` to `goal`, both ends included.
pub fn shortest_path(graph: &Graph, start: &str, goal: &str) -> Option<Vec<String>> {
    if start == goal {
        return Some(vec![start.to_string()]);
    }

    let mut parents: HashMap<&str, &str> = HashMap::new();
    let mut visited: HashSet<&str> = HashSet::from([start]);
    let mut queue: VecDeque<&str> = VecDeque::from([start]);

    while let Some(current) = queue.pop_front() {
        for next in graph.successors(current) {
            if !visited.insert(next) {
                continue;
            }
            parents.insert(next, current);
            if next == goal {
                let mut path = vec![goal.to_string()];
                let mut cursor = goal;
                while let Some(&parent) = parents.get(cursor) {
                    path.push(parent.to_string());
                    cursor = parent;
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back(next);
        }
    }

    None
}
