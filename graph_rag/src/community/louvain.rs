//! Louvain modularity optimisation over the undirected entity graph.
//!
//! Every relationship adds weight 1.0 between its endpoints, so parallel
//! edges accumulate. Nodes are visited in index order and candidate
//! communities in ascending id, which makes the result deterministic.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use kgrag_models::{Entity, Relationship};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

const MAX_LOCAL_ITERATIONS: usize = 100;
const MIN_GAIN: f64 = 1e-12;

/// Build the weighted graph. Nodes are added in name order, including
/// relationship endpoints that have no entity record.
pub fn build_graph(entities: &[Entity], relationships: &[Relationship]) -> UnGraph<String, f64> {
    let names: BTreeSet<&str> = entities
        .iter()
        .map(|e| e.name.as_str())
        .chain(relationships.iter().flat_map(|r| [r.source.as_str(), r.target.as_str()]))
        .collect();

    let mut graph = UnGraph::with_capacity(names.len(), relationships.len());
    let mut index: HashMap<&str, NodeIndex> = HashMap::with_capacity(names.len());
    for name in names {
        index.insert(name, graph.add_node(name.to_string()));
    }
    for rel in relationships {
        if let (Some(&a), Some(&b)) = (index.get(rel.source.as_str()), index.get(rel.target.as_str())) {
            graph.add_edge(a, b, 1.0);
        }
    }
    graph
}

/// Weighted adjacency of one aggregation level.
struct Level {
    neighbours: Vec<BTreeMap<usize, f64>>,
    self_loops: Vec<f64>,
}

impl Level {
    fn from_graph(graph: &UnGraph<String, f64>) -> Self {
        let n = graph.node_count();
        let mut level = Level {
            neighbours: vec![BTreeMap::new(); n],
            self_loops: vec![0.0; n],
        };
        for edge in graph.edge_references() {
            let (a, b, w) = (edge.source().index(), edge.target().index(), *edge.weight());
            if a == b {
                level.self_loops[a] += w;
            } else {
                *level.neighbours[a].entry(b).or_default() += w;
                *level.neighbours[b].entry(a).or_default() += w;
            }
        }
        level
    }

    fn len(&self) -> usize {
        self.self_loops.len()
    }

    fn degree(&self, node: usize) -> f64 {
        self.neighbours[node].values().sum::<f64>() + 2.0 * self.self_loops[node]
    }

    /// Greedy moves until no node changes community. Returns dense labels.
    fn local_moving(&self) -> Vec<usize> {
        let n = self.len();
        let degrees: Vec<f64> = (0..n).map(|i| self.degree(i)).collect();
        let m2: f64 = degrees.iter().sum();
        let mut community: Vec<usize> = (0..n).collect();
        if m2 <= 0.0 {
            return community;
        }
        let mut totals = degrees.clone();

        for _ in 0..MAX_LOCAL_ITERATIONS {
            let mut moved = false;
            for node in 0..n {
                let current = community[node];
                let k = degrees[node];

                let mut links: BTreeMap<usize, f64> = BTreeMap::new();
                for (&other, &w) in &self.neighbours[node] {
                    *links.entry(community[other]).or_default() += w;
                }

                totals[current] -= k;
                let gain = |c: usize, w: f64| w - totals[c] * k / m2;
                let mut best = current;
                let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
                for (&candidate, &w) in &links {
                    let candidate_gain = gain(candidate, w);
                    if candidate_gain > best_gain + MIN_GAIN {
                        best = candidate;
                        best_gain = candidate_gain;
                    }
                }
                totals[best] += k;

                if best != current {
                    community[node] = best;
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }
        relabel(&community)
    }

    /// Collapse every community into one node.
    fn aggregate(&self, community: &[usize], count: usize) -> Level {
        let mut next = Level {
            neighbours: vec![BTreeMap::new(); count],
            self_loops: vec![0.0; count],
        };
        for node in 0..self.len() {
            let c = community[node];
            next.self_loops[c] += self.self_loops[node];
            for (&other, &w) in &self.neighbours[node] {
                let d = community[other];
                if c == d {
                    // each internal edge is seen from both endpoints
                    next.self_loops[c] += w / 2.0;
                } else {
                    *next.neighbours[c].entry(d).or_default() += w;
                }
            }
        }
        next
    }
}

/// Renumber labels densely in order of first appearance.
fn relabel(labels: &[usize]) -> Vec<usize> {
    let mut dense: HashMap<usize, usize> = HashMap::new();
    labels
        .iter()
        .map(|label| {
            let next = dense.len();
            *dense.entry(*label).or_insert(next)
        })
        .collect()
}

/// Community of every node, indexed like `graph`'s nodes.
pub fn louvain(graph: &UnGraph<String, f64>) -> Vec<usize> {
    let mut membership: Vec<usize> = (0..graph.node_count()).collect();
    let mut level = Level::from_graph(graph);

    loop {
        let community = level.local_moving();
        let count = community.iter().max().map_or(0, |max| max + 1);
        for label in membership.iter_mut() {
            *label = community[*label];
        }
        if count == level.len() {
            break;
        }
        level = level.aggregate(&community, count);
    }
    membership
}

/// Newman modularity of a partition of `graph`.
pub fn modularity(graph: &UnGraph<String, f64>, membership: &[usize]) -> f64 {
    let level = Level::from_graph(graph);
    let m2: f64 = (0..level.len()).map(|i| level.degree(i)).sum();
    if m2 <= 0.0 {
        return 0.0;
    }

    let mut internal: HashMap<usize, f64> = HashMap::new();
    let mut totals: HashMap<usize, f64> = HashMap::new();
    for node in 0..level.len() {
        let c = membership[node];
        *totals.entry(c).or_default() += level.degree(node);
        let mut inside = 2.0 * level.self_loops[node];
        for (&other, &w) in &level.neighbours[node] {
            if membership[other] == c {
                inside += w;
            }
        }
        *internal.entry(c).or_default() += inside;
    }

    totals
        .iter()
        .map(|(c, tot)| internal.get(c).copied().unwrap_or(0.0) / m2 - (tot / m2).powi(2))
        .sum()
}

/// Entity name to community label.
pub fn detect(entities: &[Entity], relationships: &[Relationship]) -> BTreeMap<String, i64> {
    let graph = build_graph(entities, relationships);
    let membership = louvain(&graph);
    graph
        .node_indices()
        .map(|idx| (graph[idx].clone(), membership[idx.index()] as i64))
        .collect()
}

/// Summary statistics over community sizes, nearest-rank percentiles.
pub fn size_distribution(labels: &BTreeMap<String, i64>) -> BTreeMap<String, f64> {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for label in labels.values() {
        *counts.entry(*label).or_default() += 1;
    }
    let mut sizes: Vec<usize> = counts.into_values().collect();
    sizes.sort_unstable();

    let mut distribution = BTreeMap::new();
    if sizes.is_empty() {
        return distribution;
    }
    let percentile = |p: f64| {
        let rank = ((p / 100.0) * sizes.len() as f64).ceil() as usize;
        sizes[rank.clamp(1, sizes.len()) - 1] as f64
    };

    distribution.insert("min".to_string(), sizes[0] as f64);
    distribution.insert("max".to_string(), sizes[sizes.len() - 1] as f64);
    distribution.insert(
        "mean".to_string(),
        sizes.iter().sum::<usize>() as f64 / sizes.len() as f64,
    );
    for p in [50.0, 75.0, 90.0, 99.0] {
        distribution.insert(format!("p{}", p as u32), percentile(p));
    }
    distribution
}
