//! Community detection over the mutual-connection graph.
//!
//! Single-level greedy modularity optimization in the spirit of Louvain's
//! local-moving phase (Blondel et al. 2008), without hierarchical
//! coarsening. Every node starts in its own community; repeated passes
//! move nodes to the neighbor community with the best modularity gain
//! until a pass makes no move, the pass bound is hit, or global
//! modularity stops improving. The partition with the best-seen
//! modularity wins.
//!
//! Node-visit order affects move decisions, so the result is
//! deterministic for a fixed node ordering but not invariant under
//! reordering. Node order is insertion order into the graph.

use std::collections::HashMap;

use tracing::{debug, warn};

use skymap_common::{Community, CommunityMetrics, EdgeKind, SocialGraph};

/// Passes over the full node set before detection gives up converging.
const MAX_PASSES: usize = 10;

/// Central nodes reported per community.
const MAX_CENTRAL_NODES: usize = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct CommunityDetector;

/// Graph flattened to indices, with the weighted multiset adjacency the
/// local-moving phase works on. An edge of weight w inserts each endpoint
/// into the other's neighbor list w times, so heavier relationships count
/// more toward shared-neighbor overlap.
struct DetectorGraph {
    edges: Vec<(usize, usize, EdgeKind)>,
    adjacency: Vec<Vec<usize>>,
    /// Total edge weight.
    total_weight: f64,
}

impl CommunityDetector {
    pub fn new() -> Self {
        Self
    }

    /// Partition the graph into communities. Graphs with no edges or
    /// fewer than two nodes yield an empty list: there is nothing to
    /// partition.
    pub fn detect(&self, graph: &SocialGraph) -> Vec<Community> {
        let n = graph.nodes.len();
        if n < 2 {
            return Vec::new();
        }

        let index: HashMap<&str, usize> = graph
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.as_str(), i))
            .collect();

        let mut edges: Vec<(usize, usize, EdgeKind)> = Vec::with_capacity(graph.edges.len());
        for edge in &graph.edges {
            match (index.get(edge.source.as_str()), index.get(edge.target.as_str())) {
                (Some(&s), Some(&t)) if s != t => edges.push((s, t, edge.kind)),
                _ => {
                    // Builder guarantees endpoint validity; recover anyway.
                    warn!(
                        source = edge.source.as_str(),
                        target = edge.target.as_str(),
                        "Ignoring inconsistent edge during detection"
                    );
                }
            }
        }
        if edges.is_empty() {
            return Vec::new();
        }

        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut total_weight = 0.0;
        for &(s, t, kind) in &edges {
            let w = kind.weight() as usize;
            for _ in 0..w {
                adjacency[s].push(t);
                adjacency[t].push(s);
            }
            total_weight += kind.weight() as f64;
        }

        let detector_graph = DetectorGraph {
            edges,
            adjacency,
            total_weight,
        };

        let partition = self.optimize(&detector_graph, n);
        build_communities(graph, &detector_graph, &partition)
    }

    /// Greedy local moving. Returns the node→community assignment with
    /// the best modularity seen across passes (the all-singleton baseline
    /// included).
    fn optimize(&self, graph: &DetectorGraph, n: usize) -> Vec<usize> {
        let m = graph.total_weight;
        let two_m = 2.0 * m;

        let mut communities: Vec<usize> = (0..n).collect();
        let mut sizes: Vec<usize> = vec![1; n];

        let mut best_partition = communities.clone();
        let mut best_q = modularity(graph, &communities);
        let mut prev_q = best_q;

        for pass in 0..MAX_PASSES {
            let mut moves = 0usize;

            for node in 0..n {
                let current = communities[node];

                // Weighted links from this node to each neighbor
                // community, tracked in first-seen order so candidate
                // ties resolve deterministically.
                let mut links: HashMap<usize, f64> = HashMap::new();
                let mut candidate_order: Vec<usize> = Vec::new();
                for &neighbor in &graph.adjacency[node] {
                    let community = communities[neighbor];
                    if let std::collections::hash_map::Entry::Vacant(entry) =
                        links.entry(community)
                    {
                        entry.insert(0.0);
                        candidate_order.push(community);
                    }
                    *links.get_mut(&community).expect("just inserted") += 1.0;
                }

                let to_current = links.get(&current).copied().unwrap_or(0.0);

                // A move needs strictly positive gain; a tie with staying
                // keeps the node in place, and ties between candidates go
                // to the earliest-seen one.
                let mut best_gain = 0.0;
                let mut target: Option<usize> = None;
                for &candidate in &candidate_order {
                    if candidate == current {
                        continue;
                    }
                    let to_candidate = links[&candidate];
                    let gain = to_candidate / m
                        - to_current / m
                        - (sizes[current] as f64 * sizes[candidate] as f64) / (two_m * two_m);
                    if gain > best_gain {
                        best_gain = gain;
                        target = Some(candidate);
                    }
                }

                if let Some(target) = target {
                    sizes[current] -= 1;
                    sizes[target] += 1;
                    communities[node] = target;
                    moves += 1;
                }
            }

            if moves == 0 {
                break;
            }

            let q = modularity(graph, &communities);
            debug!(pass, moves, modularity = q, "Community detection pass complete");
            if q > best_q {
                best_q = q;
                best_partition = communities.clone();
            }
            if q <= prev_q {
                break;
            }
            prev_q = q;
        }

        best_partition
    }
}

/// Weighted modularity of a partition:
/// `Q = (1/2m) Σ_c [2·W_in(c) − ((Σ_c k)² − Σ_c k²) / 2m]`,
/// the closed form of summing `w_ij − k_i·k_j/2m` over ordered
/// same-community pairs. `k_i` is the weighted degree, `m` total weight.
fn modularity(graph: &DetectorGraph, communities: &[usize]) -> f64 {
    let m = graph.total_weight;
    if m == 0.0 {
        return 0.0;
    }
    let two_m = 2.0 * m;
    let n = graph.adjacency.len();

    // Community slots are node indices, so plain vectors keep the
    // accumulation order (and therefore the float result) deterministic.
    let mut internal_weight = vec![0.0f64; n];
    for &(s, t, kind) in &graph.edges {
        if communities[s] == communities[t] {
            internal_weight[communities[s]] += kind.weight() as f64;
        }
    }

    let mut degree_sum = vec![0.0f64; n];
    let mut degree_sq_sum = vec![0.0f64; n];
    for (node, neighbors) in graph.adjacency.iter().enumerate() {
        let k = neighbors.len() as f64;
        degree_sum[communities[node]] += k;
        degree_sq_sum[communities[node]] += k * k;
    }

    let mut q = 0.0;
    for community in 0..n {
        let sum_k = degree_sum[community];
        if sum_k == 0.0 && internal_weight[community] == 0.0 {
            continue;
        }
        q += 2.0 * internal_weight[community] - (sum_k * sum_k - degree_sq_sum[community]) / two_m;
    }
    q / two_m
}

/// Materialize communities from a node→slot assignment: group members in
/// node order, number cells by first appearance, drop nothing else (empty
/// cells simply never materialize), and compute per-community metrics.
fn build_communities(
    graph: &SocialGraph,
    detector_graph: &DetectorGraph,
    partition: &[usize],
) -> Vec<Community> {
    let mut slot_to_id: HashMap<usize, u32> = HashMap::new();
    let mut members: Vec<Vec<usize>> = Vec::new();
    for (node, &slot) in partition.iter().enumerate() {
        let next_id = members.len() as u32;
        let id = *slot_to_id.entry(slot).or_insert(next_id);
        if id as usize == members.len() {
            members.push(Vec::new());
        }
        members[id as usize].push(node);
    }

    let mut communities = Vec::with_capacity(members.len());
    for (id, member_nodes) in members.iter().enumerate() {
        let slot = partition[member_nodes[0]];

        let mut intra_edges = 0u32;
        let mut mutual_edges = 0u32;
        let mut intra_degree: HashMap<usize, f64> = HashMap::new();
        for &(s, t, kind) in &detector_graph.edges {
            if partition[s] == slot && partition[t] == slot {
                intra_edges += 1;
                if kind == EdgeKind::Mutual {
                    mutual_edges += 1;
                }
                *intra_degree.entry(s).or_insert(0.0) += kind.weight() as f64;
                *intra_degree.entry(t).or_insert(0.0) += kind.weight() as f64;
            }
        }

        let count = member_nodes.len();
        let possible_pairs = (count * count.saturating_sub(1) / 2) as f64;
        let density = if possible_pairs > 0.0 {
            intra_edges as f64 / possible_pairs
        } else {
            0.0
        };
        let cohesion = if intra_edges > 0 {
            mutual_edges as f64 / intra_edges as f64
        } else {
            0.0
        };

        // Stable sort keeps node-insertion order among equal degrees.
        let mut ranked: Vec<usize> = member_nodes.clone();
        ranked.sort_by(|a, b| {
            let da = intra_degree.get(a).copied().unwrap_or(0.0);
            let db = intra_degree.get(b).copied().unwrap_or(0.0);
            db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
        });

        communities.push(Community {
            id: id as u32,
            members: member_nodes
                .iter()
                .map(|&node| graph.nodes[node].id.clone())
                .collect(),
            central_nodes: ranked
                .into_iter()
                .take(MAX_CENTRAL_NODES)
                .map(|node| graph.nodes[node].id.clone())
                .collect(),
            metrics: CommunityMetrics { density, cohesion },
        });
    }

    debug!(
        communities = communities.len(),
        nodes = graph.nodes.len(),
        "Communities materialized"
    );
    communities
}
