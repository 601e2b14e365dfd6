use std::collections::{HashSet, VecDeque};

use plexus_graph::{edge_condition_passes, Graph, Node};

use crate::context::ExecutionContext;

/// What the scheduler concluded about an unsettled node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    /// All dependencies settled and the edge gate passes.
    Ready,
    /// Permanently unreachable: a dependency failed, every
    /// dependency was skipped, or every enabling edge is gone.
    Excluded,
    /// Something it needs has not settled yet.
    Undecided,
}

/// Decides which ready nodes may run at each scheduling tick.
///
/// Maintains an explicit FIFO ready queue seeded with entry nodes.
/// A node is admitted once every dependency has settled (completed,
/// or skipped via a false edge condition) with at least one of them
/// completed, and its incoming-edge gate passes against the current
/// variables. Nodes that can never run any more are marked skipped,
/// not failed. Nodes claimed as loop bodies are executed by their
/// owning loop node and never admitted here.
pub struct Scheduler {
    ready: VecDeque<String>,
    queued: HashSet<String>,
    running: HashSet<String>,
    loop_bodies: HashSet<String>,
    /// Fallback targets run only when their owning node fails.
    fallback_only: HashSet<String>,
}

impl Scheduler {
    pub fn new(graph: &Graph) -> Self {
        let loop_bodies: HashSet<String> = graph
            .loop_body_ids()
            .into_iter()
            .map(str::to_string)
            .collect();
        let fallback_only: HashSet<String> = graph
            .nodes
            .values()
            .filter_map(|node| node.error_policy.fallback_node.clone())
            .collect();

        let mut scheduler = Self {
            ready: VecDeque::new(),
            queued: HashSet::new(),
            running: HashSet::new(),
            loop_bodies,
            fallback_only,
        };
        let seedable: Vec<String> = graph
            .entry_nodes()
            .filter(|node| {
                !scheduler.loop_bodies.contains(&node.id)
                    && !scheduler.fallback_only.contains(&node.id)
            })
            .map(|node| node.id.clone())
            .collect();
        for node_id in seedable {
            scheduler.enqueue(node_id);
        }
        scheduler
    }

    fn enqueue(&mut self, node_id: String) {
        if self.queued.insert(node_id.clone()) {
            self.ready.push_back(node_id);
        }
    }

    /// Take the next batch, up to `max_concurrent_nodes`, in the
    /// order nodes became ready.
    pub fn next_batch(&mut self, graph: &Graph) -> Vec<String> {
        let width = graph.parallelism.max_concurrent_nodes.max(1);
        let mut batch = Vec::with_capacity(width.min(self.ready.len()));
        while batch.len() < width {
            let Some(node_id) = self.ready.pop_front() else {
                break;
            };
            self.queued.remove(&node_id);
            self.running.insert(node_id.clone());
            batch.push(node_id);
        }
        batch
    }

    /// A node finished (in any way); free its slot.
    pub fn settle(&mut self, node_id: &str) {
        self.running.remove(node_id);
    }

    /// Re-scan for nodes that became ready or permanently excluded,
    /// in graph insertion order, cascading until a fixpoint. Newly
    /// excluded nodes are marked skipped in the context and returned
    /// so the caller can trace them.
    pub fn reschedule(&mut self, graph: &Graph, ctx: &mut ExecutionContext) -> Vec<String> {
        let mut newly_skipped = Vec::new();
        loop {
            let mut changed = false;
            for node_id in &graph.node_order {
                if !self.is_pending(ctx, node_id) {
                    continue;
                }
                let Some(node) = graph.node(node_id) else {
                    continue;
                };
                match self.decide(graph, ctx, node) {
                    Decision::Ready => {
                        self.enqueue(node_id.clone());
                        changed = true;
                    }
                    Decision::Excluded => {
                        ctx.mark_skipped(node_id.clone());
                        newly_skipped.push(node_id.clone());
                        changed = true;
                    }
                    Decision::Undecided => {}
                }
            }
            if !changed {
                break;
            }
        }
        newly_skipped
    }

    /// Admit a node unconditionally (fallback path).
    pub fn force_ready(&mut self, graph: &Graph, ctx: &ExecutionContext, node_id: &str) {
        if !graph.nodes.contains_key(node_id) {
            return;
        }
        if ctx.visited().contains(node_id)
            || ctx.failed().contains(node_id)
            || self.running.contains(node_id)
        {
            return;
        }
        self.enqueue(node_id.to_string());
    }

    /// Nothing queued and nothing in flight.
    pub fn idle(&self) -> bool {
        self.ready.is_empty() && self.running.is_empty()
    }

    pub fn is_loop_body(&self, node_id: &str) -> bool {
        self.loop_bodies.contains(node_id)
    }

    fn is_pending(&self, ctx: &ExecutionContext, node_id: &str) -> bool {
        !self.queued.contains(node_id)
            && !self.running.contains(node_id)
            && !self.loop_bodies.contains(node_id)
            && !self.fallback_only.contains(node_id)
            && !ctx.visited().contains(node_id)
            && !ctx.failed().contains(node_id)
            && !ctx.skipped().contains(node_id)
    }

    fn decide(&self, graph: &Graph, ctx: &ExecutionContext, node: &Node) -> Decision {
        let settled = |id: &String| {
            ctx.visited().contains(id)
                || ctx.failed().contains(id)
                || ctx.skipped().contains(id)
        };

        if !node.dependencies.iter().all(settled) {
            return Decision::Undecided;
        }
        if node
            .dependencies
            .iter()
            .any(|dep| ctx.failed().contains(dep))
        {
            return Decision::Excluded;
        }
        if !node.dependencies.is_empty()
            && node
                .dependencies
                .iter()
                .all(|dep| ctx.skipped().contains(dep))
        {
            return Decision::Excluded;
        }

        self.gate(graph, ctx, &node.id)
    }

    /// Incoming-edge gate. Among edges whose source completed, every
    /// condition must hold — unless an unconditional edge from a
    /// completed source also reaches this node. A failing gate is
    /// only permanent once every edge source has settled.
    fn gate(&self, graph: &Graph, ctx: &ExecutionContext, node_id: &str) -> Decision {
        let mut saw_edge = false;
        let mut from_completed = false;
        let mut all_true = true;
        let mut any_unconditional = false;
        let mut all_sources_settled = true;

        for edge in graph.edges_to(node_id) {
            saw_edge = true;
            if ctx.visited().contains(&edge.source) {
                from_completed = true;
                match &edge.condition {
                    None => any_unconditional = true,
                    Some(condition) => {
                        if !edge_condition_passes(Some(condition), ctx.variables()) {
                            all_true = false;
                        }
                    }
                }
            } else if !ctx.failed().contains(&edge.source)
                && !ctx.skipped().contains(&edge.source)
            {
                all_sources_settled = false;
            }
        }

        if !saw_edge {
            return Decision::Ready;
        }
        if from_completed && (all_true || any_unconditional) {
            return Decision::Ready;
        }
        if all_sources_settled {
            return Decision::Excluded;
        }
        Decision::Undecided
    }
}
