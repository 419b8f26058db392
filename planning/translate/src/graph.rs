//! Strongly connected components of directed graphs over `0..n`.

/// Computes the strongly connected components of the graph whose successors of vertex `v` are
/// `successors[v]`.
///
/// Components are returned in topological order: if there is an edge from a vertex of component `i`
/// to a vertex of component `j != i`, then `i < j`. Vertices inside a component are ordered by
/// discovery time. The traversal is iterative.
pub fn strongly_connected_components(successors: &[Vec<usize>]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;
    let n = successors.len();
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut sccs: Vec<Vec<usize>> = Vec::new();
    let mut next_index = 0;

    // (vertex, position of the next successor to explore)
    let mut frames: Vec<(usize, usize)> = Vec::new();
    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        frames.push((root, 0));
        while let Some(&(v, next)) = frames.last() {
            if next == 0 && index[v] == UNVISITED {
                index[v] = next_index;
                lowlink[v] = next_index;
                next_index += 1;
                stack.push(v);
                on_stack[v] = true;
            }
            if let Some(&w) = successors[v].get(next) {
                let top = frames.len() - 1;
                frames[top].1 += 1;
                if index[w] == UNVISITED {
                    frames.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
                continue;
            }
            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[v]);
            }
            if lowlink[v] == index[v] {
                let start = stack.iter().rposition(|&u| u == v).unwrap_or(0);
                let scc = stack.split_off(start);
                for &u in &scc {
                    on_stack[u] = false;
                }
                sccs.push(scc);
            }
        }
    }
    sccs.reverse();
    sccs
}
