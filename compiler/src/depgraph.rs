// depgraph.rs — Declaration/instance dependency graph and ordering
//
// Collects every declaration and instance discovered while generating one
// scope, deduplicates them by name, and orders them with a three-colour
// depth-first topological sort so that an item is always emitted before
// the items listed as its dependents.
//
// Preconditions: item names are unique identifiers within one scope.
// Postconditions: `local` and `escaped` together hold every distinct item
//                 exactly once, each list in dependency order; ties keep
//                 first-insertion order.
// Failure modes: a dependency cycle → `E0200` diagnostic naming the cycle.
// Side effects: none.

use std::collections::HashMap;

use crate::code::CodeItem;
use crate::diag::{codes, Diagnostic};

// ── Arena ───────────────────────────────────────────────────────────────────

/// Handle of a node in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u32);

#[derive(Debug)]
struct GraphNode {
    /// The retained (first) occurrence, with its dependents detached.
    item: CodeItem,
    dependents: Vec<ItemId>,
}

#[derive(Debug, Default)]
pub struct DepGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<String, ItemId>,
}

/// Items split by the scope that has to emit them.
#[derive(Debug, Default)]
pub struct SortedItems {
    /// Items belonging to the scope being generated, in emission order.
    pub local: Vec<CodeItem>,
    /// Items declared in an enclosing scope, handed back to the caller.
    pub escaped: Vec<CodeItem>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn item(&self, id: ItemId) -> &CodeItem {
        &self.nodes[id.0 as usize].item
    }

    pub fn dependents(&self, id: ItemId) -> &[ItemId] {
        &self.nodes[id.0 as usize].dependents
    }

    pub fn lookup(&self, name: &str) -> Option<ItemId> {
        self.index.get(name).copied()
    }

    /// Insert an item and, recursively, its dependents. A name seen before
    /// keeps its first occurrence; the duplicate's dependents are merged
    /// onto the retained node.
    pub fn insert(&mut self, mut item: CodeItem) -> ItemId {
        let deps = item.take_dependents();
        let id = match self.index.get(item.name()) {
            Some(&id) => id,
            None => {
                let id = ItemId(self.nodes.len() as u32);
                self.index.insert(item.name().to_string(), id);
                self.nodes.push(GraphNode {
                    item,
                    dependents: Vec::new(),
                });
                id
            }
        };
        for dep in deps {
            let dep_id = self.insert(dep);
            let edges = &mut self.nodes[id.0 as usize].dependents;
            if !edges.contains(&dep_id) {
                edges.push(dep_id);
            }
        }
        id
    }

    // ── Topological sort (three-colour DFS) ─────────────────────────────

    /// Order all nodes so that every node precedes its dependents.
    /// Independent nodes keep insertion order.
    pub fn sort(&self) -> Result<Vec<ItemId>, Diagnostic> {
        let n = self.nodes.len();
        // Reverse adjacency: who must come before me.
        let mut prerequisites: Vec<Vec<ItemId>> = vec![Vec::new(); n];
        for (i, node) in self.nodes.iter().enumerate() {
            for dep in &node.dependents {
                prerequisites[dep.0 as usize].push(ItemId(i as u32));
            }
        }

        let mut marks = vec![Mark::Unvisited; n];
        let mut path = Vec::new();
        let mut order = Vec::with_capacity(n);
        for i in 0..n {
            self.visit(ItemId(i as u32), &prerequisites, &mut marks, &mut path, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        id: ItemId,
        prerequisites: &[Vec<ItemId>],
        marks: &mut [Mark],
        path: &mut Vec<ItemId>,
        order: &mut Vec<ItemId>,
    ) -> Result<(), Diagnostic> {
        match marks[id.0 as usize] {
            Mark::Done => return Ok(()),
            Mark::InProgress => return Err(self.cycle_error(id, path)),
            Mark::Unvisited => {}
        }
        marks[id.0 as usize] = Mark::InProgress;
        path.push(id);
        for &p in &prerequisites[id.0 as usize] {
            self.visit(p, prerequisites, marks, path, order)?;
        }
        path.pop();
        marks[id.0 as usize] = Mark::Done;
        order.push(id);
        Ok(())
    }

    fn cycle_error(&self, id: ItemId, path: &[ItemId]) -> Diagnostic {
        let start = path.iter().position(|&p| p == id).unwrap_or(0);
        let item = self.item(id);
        let mut diag = Diagnostic::error(
            codes::E0200,
            item.location().clone(),
            format!(
                "dependency graph is not a DAG: '{}' depends on itself through {} item(s)",
                item.name(),
                path.len() - start
            ),
        );
        for &p in &path[start..] {
            diag = diag.with_related(self.item(p).name().to_string());
        }
        diag
    }

    /// Sort and split nodes into those emitted at `depth` and those that
    /// belong to an enclosing scope.
    pub fn partition(&self, depth: usize) -> Result<SortedItems, Diagnostic> {
        let order = self.sort()?;
        let mut result = SortedItems::default();
        for id in order {
            let mut item = self.item(id).clone();
            if item.stack_index() < depth {
                // Dependents that stay here were already ordered after this
                // item; only dependents that also escape travel upward.
                for &dep in self.dependents(id) {
                    let dep_item = self.item(dep);
                    if dep_item.stack_index() < depth {
                        item.add_dependent(dep_item.clone());
                    }
                }
                result.escaped.push(item);
            } else {
                for &dep in self.dependents(id) {
                    if self.item(dep).stack_index() < depth {
                        log::debug!(
                            "dropping upward dependency '{}' -> '{}'",
                            item.name(),
                            self.item(dep).name()
                        );
                    }
                }
                result.local.push(item);
            }
        }
        Ok(result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Deduplicate, order and split `items` for a scope at `depth`.
pub fn order_items(items: Vec<CodeItem>, depth: usize) -> Result<SortedItems, Diagnostic> {
    let mut graph = DepGraph::new();
    for item in items {
        graph.insert(item);
    }
    log::debug!("dependency graph at depth {}: {} item(s)", depth, graph.len());
    graph.partition(depth)
}
