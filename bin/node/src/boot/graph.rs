use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A node in the dependency graph. `data` is `None` while the node is a
/// ghost: a tag that has been referenced as a dependency but not declared
/// yet. Materialization fills `data` in place, keeping the edges intact.
pub struct GraphNode<T> {
    data: Option<T>,
    prev: BTreeSet<String>,
    next: BTreeSet<String>,
}

impl<T> GraphNode<T> {
    fn new(data: Option<T>) -> Self {
        Self {
            data,
            prev: BTreeSet::new(),
            next: BTreeSet::new(),
        }
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }

    pub fn prev(&self) -> &BTreeSet<String> {
        &self.prev
    }

    pub fn next(&self) -> &BTreeSet<String> {
        &self.next
    }
}

/// Directed dependency graph with lazily materialized nodes. Edges are
/// stored as id sets on both endpoints (lookup-only, never owning); an edge
/// `prev -> next` means `next` waits for `prev`. The node map is ordered so
/// scans and diagnostics are deterministic.
pub struct DependencyGraph<T> {
    nodes: BTreeMap<String, GraphNode<T>>,
}

impl<T> Default for DependencyGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DependencyGraph<T> {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&GraphNode<T>> {
        self.nodes.get(id)
    }

    pub fn add_node(&mut self, id: String, data: Option<T>) {
        self.nodes.insert(id, GraphNode::new(data));
    }

    /// Adds a ghost node unless the id already exists.
    pub fn ensure_node(&mut self, id: &str) {
        if !self.nodes.contains_key(id) {
            self.nodes.insert(id.to_string(), GraphNode::new(None));
        }
    }

    /// Materializes a ghost node. The id must exist.
    pub fn set_data(&mut self, id: &str, data: T) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.data = Some(data);
        }
    }

    /// Records `next` as waiting for `prev`. Both ids must exist.
    pub fn add_edge(&mut self, prev: &str, next: &str) {
        if !self.nodes.contains_key(prev) || !self.nodes.contains_key(next) {
            return;
        }
        if let Some(node) = self.nodes.get_mut(prev) {
            node.next.insert(next.to_string());
        }
        if let Some(node) = self.nodes.get_mut(next) {
            node.prev.insert(prev.to_string());
        }
    }

    /// Removes a node and detaches it from every neighbor's edge sets.
    pub fn take_node(&mut self, id: &str) -> Option<GraphNode<T>> {
        let node = self.nodes.remove(id)?;
        for prev in &node.prev {
            if let Some(neighbor) = self.nodes.get_mut(prev) {
                neighbor.next.remove(id);
            }
        }
        for next in &node.next {
            if let Some(neighbor) = self.nodes.get_mut(next) {
                neighbor.prev.remove(id);
            }
        }
        Some(node)
    }

    /// Ids of materialized nodes with no pending dependencies, in id order.
    pub fn startable(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.data.is_some() && node.prev.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Ids of ghost nodes, in id order.
    pub fn ghost_ids(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.data.is_none())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Finds one cycle, following `next` edges, and returns its node ids in
    /// traversal order. Deterministic: the search starts from the smallest
    /// id.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;

        let mut colors: HashMap<&str, u8> = HashMap::with_capacity(self.nodes.len());
        let mut path: Vec<&str> = Vec::new();

        fn visit<'a, T>(
            graph: &'a DependencyGraph<T>,
            id: &'a str,
            colors: &mut HashMap<&'a str, u8>,
            path: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            colors.insert(id, GRAY);
            path.push(id);
            if let Some(node) = graph.nodes.get(id) {
                for next in &node.next {
                    match colors.get(next.as_str()).copied().unwrap_or(WHITE) {
                        GRAY => {
                            let start = path
                                .iter()
                                .position(|candidate| *candidate == next.as_str())
                                .unwrap_or(0);
                            return Some(
                                path[start..].iter().map(|id| id.to_string()).collect(),
                            );
                        }
                        WHITE => {
                            if let Some(cycle) = visit(graph, next, colors, path) {
                                return Some(cycle);
                            }
                        }
                        _ => {}
                    }
                }
            }
            path.pop();
            colors.insert(id, BLACK);
            None
        }

        for id in self.nodes.keys() {
            if colors.get(id.as_str()).copied().unwrap_or(WHITE) == WHITE {
                if let Some(cycle) = visit(self, id, &mut colors, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_of(edges: &[(&str, &str)]) -> DependencyGraph<u32> {
        let mut graph = DependencyGraph::new();
        for (prev, next) in edges {
            if graph.get(prev).is_none() {
                graph.add_node(prev.to_string(), Some(0));
            }
            if graph.get(next).is_none() {
                graph.add_node(next.to_string(), Some(0));
            }
            graph.add_edge(prev, next);
        }
        graph
    }

    #[test]
    fn ghost_nodes_materialize_in_place() {
        let mut graph: DependencyGraph<u32> = DependencyGraph::new();
        graph.ensure_node("a");
        graph.add_node("b".to_string(), Some(7));
        graph.add_edge("a", "b");

        assert_eq!(graph.ghost_ids(), vec!["a".to_string()]);
        assert!(graph.startable().is_empty());

        graph.set_data("a", 3);
        assert!(graph.ghost_ids().is_empty());
        assert_eq!(graph.startable(), vec!["a".to_string()]);
        assert_eq!(graph.get("b").unwrap().prev().len(), 1);
    }

    #[test]
    fn taking_a_node_releases_its_dependents() {
        let mut graph = graph_of(&[("a", "b"), ("a", "c"), ("b", "c")]);
        assert_eq!(graph.startable(), vec!["a".to_string()]);

        let node = graph.take_node("a").unwrap();
        assert_eq!(node.next().len(), 2);
        assert_eq!(graph.startable(), vec!["b".to_string()]);

        graph.take_node("b");
        assert_eq!(graph.startable(), vec!["c".to_string()]);
        graph.take_node("c");
        assert!(graph.is_empty());
    }

    #[test]
    fn finds_a_two_node_cycle() {
        let graph = graph_of(&[("a", "b"), ("b", "a")]);
        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn finds_a_cycle_behind_a_chain() {
        let graph = graph_of(&[("a", "b"), ("b", "c"), ("c", "d"), ("d", "b")]);
        let cycle = graph.find_cycle().unwrap();
        assert_eq!(
            cycle,
            vec!["b".to_string(), "c".to_string(), "d".to_string()]
        );
    }

    #[test]
    fn acyclic_graphs_have_no_cycle() {
        let graph = graph_of(&[("a", "b"), ("b", "c"), ("a", "c")]);
        assert!(graph.find_cycle().is_none());
    }
}
