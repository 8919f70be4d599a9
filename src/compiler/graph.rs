use crate::dsl::{Edge, Node};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

pub type NodeIndex = usize;
pub type EdgeIndex = usize;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Duplicate node ID: {0}")]
    DuplicateNode(String),

    #[error("Edge '{edge}' references unknown node '{node}'")]
    DanglingEdge { edge: String, node: String },

    #[error("Cycle detected among nodes: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// 校验后的图索引 (执行计划)
///
/// Node indices follow declaration order in the `nodes` slice the plan was
/// built from.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    id_map: HashMap<String, NodeIndex>,
    successors: Vec<Vec<(EdgeIndex, NodeIndex)>>,
    in_degree: Vec<usize>,
    starting: Vec<NodeIndex>,
    order: Vec<NodeIndex>,
}

impl ExecutionPlan {
    pub fn build(nodes: &[Node], edges: &[Edge]) -> Result<Self, GraphError> {
        // 1. Indexing
        let mut id_map = HashMap::with_capacity(nodes.len());
        for (idx, node) in nodes.iter().enumerate() {
            if id_map.insert(node.id.clone(), idx).is_some() {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
        }

        // 2. Adjacency & in-degree
        let mut successors: Vec<Vec<(EdgeIndex, NodeIndex)>> = vec![Vec::new(); nodes.len()];
        let mut in_degree = vec![0usize; nodes.len()];
        for (e_idx, edge) in edges.iter().enumerate() {
            let source = resolve(&id_map, edge, &edge.source_node_id)?;
            let target = resolve(&id_map, edge, &edge.target_node_id)?;
            successors[source].push((e_idx, target));
            in_degree[target] += 1;
        }

        let starting: Vec<NodeIndex> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();

        // 3. Kahn's algorithm; anything left over sits on or behind a cycle
        let mut remaining = in_degree.clone();
        let mut queue: VecDeque<NodeIndex> = starting.iter().copied().collect();
        let mut order = Vec::with_capacity(nodes.len());
        while let Some(u) = queue.pop_front() {
            order.push(u);
            for &(_, v) in &successors[u] {
                remaining[v] -= 1;
                if remaining[v] == 0 {
                    queue.push_back(v);
                }
            }
        }

        if order.len() != nodes.len() {
            let cycle = cycle_members(nodes, &successors, &order);
            return Err(GraphError::Cycle(cycle));
        }

        Ok(Self {
            id_map,
            successors,
            in_degree,
            starting,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.in_degree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_degree.is_empty()
    }

    pub fn index_of(&self, node_id: &str) -> Option<NodeIndex> {
        self.id_map.get(node_id).copied()
    }

    /// Nodes with no incoming edge, in declaration order.
    pub fn starting_nodes(&self) -> &[NodeIndex] {
        &self.starting
    }

    /// Outgoing `(edge, target)` pairs of a node.
    pub fn successors(&self, node: NodeIndex) -> &[(EdgeIndex, NodeIndex)] {
        &self.successors[node]
    }

    pub fn in_degree(&self, node: NodeIndex) -> usize {
        self.in_degree[node]
    }

    pub fn topological_order(&self) -> &[NodeIndex] {
        &self.order
    }
}

/// Validate a graph without keeping the plan around.
pub fn validate(nodes: &[Node], edges: &[Edge]) -> Result<(), GraphError> {
    ExecutionPlan::build(nodes, edges).map(|_| ())
}

fn resolve(id_map: &HashMap<String, NodeIndex>, edge: &Edge, node_id: &str) -> Result<NodeIndex, GraphError> {
    id_map.get(node_id).copied().ok_or_else(|| GraphError::DanglingEdge {
        edge: edge.id.clone(),
        node: node_id.to_string(),
    })
}

/// Peel off nodes that cannot reach a cycle so only cycle members (and the
/// nodes bridging two cycles) are reported.
fn cycle_members(nodes: &[Node], successors: &[Vec<(EdgeIndex, NodeIndex)>], ordered: &[NodeIndex]) -> Vec<String> {
    let mut alive = vec![true; nodes.len()];
    for &i in ordered {
        alive[i] = false;
    }

    loop {
        let mut changed = false;
        for u in 0..nodes.len() {
            if alive[u] && !successors[u].iter().any(|&(_, v)| alive[v]) {
                alive[u] = false;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    nodes
        .iter()
        .enumerate()
        .filter(|(i, _)| alive[*i])
        .map(|(_, n)| n.id.clone())
        .collect()
}
