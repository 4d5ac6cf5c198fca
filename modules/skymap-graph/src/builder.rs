use std::collections::HashSet;

use tracing::{debug, warn};

use skymap_common::{Account, Connection, ConnectionKind, EdgeKind, GraphEdge, GraphNode, SocialGraph};

/// Assemble the node/edge graph for a subject and its resolved
/// connections. Nodes are deduplicated by id in insertion order (subject
/// first); edges referencing an unknown endpoint are dropped, never
/// stored.
pub fn build_graph(
    subject: &Account,
    connections: &[Connection],
    extra_edges: &[GraphEdge],
) -> SocialGraph {
    let mut nodes: Vec<GraphNode> = Vec::with_capacity(connections.len() + 1);
    let mut known: HashSet<String> = HashSet::with_capacity(connections.len() + 1);

    nodes.push(GraphNode {
        id: subject.id.clone(),
        display_name: subject.display_name.clone(),
        handle: subject.handle.clone(),
    });
    known.insert(subject.id.clone());

    let mut skipped = 0usize;
    for connection in connections {
        if connection.other_id.is_empty() {
            // Malformed record; recover by skipping it.
            skipped += 1;
            continue;
        }
        if known.insert(connection.other_id.clone()) {
            nodes.push(GraphNode {
                id: connection.other_id.clone(),
                display_name: connection.profile.display_name.clone(),
                handle: connection.profile.handle.clone(),
            });
        }
    }
    if skipped > 0 {
        warn!(skipped, "Skipped connection records missing an identifier");
    }

    let mut edges: Vec<GraphEdge> = Vec::new();
    for connection in connections {
        if connection.kind != ConnectionKind::Mutual {
            continue;
        }
        if !known.contains(connection.other_id.as_str()) {
            continue;
        }
        edges.push(GraphEdge::new(
            subject.id.clone(),
            connection.other_id.clone(),
            EdgeKind::Mutual,
        ));
    }

    for edge in extra_edges {
        if known.contains(edge.source.as_str()) && known.contains(edge.target.as_str()) {
            edges.push(edge.clone());
        } else {
            warn!(
                source = edge.source.as_str(),
                target = edge.target.as_str(),
                "Dropping edge referencing unknown endpoint"
            );
        }
    }

    // Final filter: no edge may survive with an endpoint outside the
    // node set.
    edges.retain(|edge| known.contains(edge.source.as_str()) && known.contains(edge.target.as_str()));

    debug!(
        nodes = nodes.len(),
        edges = edges.len(),
        subject = subject.handle.as_str(),
        "Graph assembled"
    );

    SocialGraph {
        central_id: subject.id.clone(),
        nodes,
        edges,
    }
}
