//! Compressed Sparse Row (CSR) donor graph for drainage-network topology.
//!
//! Links are addressed by dense indices here; `network` owns the mapping from
//! link ids. Every node has at most one receiver, so the donor lists of all
//! nodes partition the edge set and a single offsets array suffices.

/// CSR representation of the donor (upstream) relation.
#[derive(Debug, Clone)]
pub struct CsrFlowGraph {
    pub offsets: Vec<usize>,
    pub neighbors: Vec<usize>,
    pub num_nodes: usize,
}

impl CsrFlowGraph {
    /// Builds the donor graph from a receiver array. `receivers[i]` is the
    /// node `i` drains into, or `None` for a network outlet.
    pub fn from_receivers(receivers: &[Option<usize>]) -> Self {
        let num_nodes = receivers.len();
        let mut counts = vec![0usize; num_nodes];
        for (donor, recv) in receivers.iter().enumerate() {
            if let Some(recv) = *recv {
                if recv < num_nodes && recv != donor {
                    counts[recv] += 1;
                }
            }
        }
        let mut offsets = Vec::with_capacity(num_nodes + 1);
        let mut running = 0usize;
        offsets.push(running);
        for &c in counts.iter() {
            running += c;
            offsets.push(running);
        }
        let mut neighbors = vec![0usize; running];
        let mut write_pos = offsets.clone();
        for (donor, recv) in receivers.iter().enumerate() {
            if let Some(recv) = *recv {
                if recv < num_nodes && recv != donor {
                    neighbors[write_pos[recv]] = donor;
                    write_pos[recv] += 1;
                }
            }
        }
        Self { offsets, neighbors, num_nodes }
    }

    #[inline]
    pub fn neighbors_of(&self, node: usize) -> &[usize] {
        &self.neighbors[self.offsets[node]..self.offsets[node + 1]]
    }

    #[inline]
    pub fn num_edges(&self) -> usize { self.neighbors.len() }
}

/// Outlet-first ordering of every node (breadth-first over donors).
///
/// Returns the nodes that could not be reached from any outlet on failure:
/// in a receiver graph those are exactly the nodes on, or draining into, a
/// cycle.
pub fn stack_order(
    receivers: &[Option<usize>],
    donors: &CsrFlowGraph,
) -> Result<Vec<usize>, Vec<usize>> {
    let n = receivers.len();
    let mut visited = vec![false; n];
    let mut queue: Vec<usize> = (0..n).filter(|&i| receivers[i].is_none()).collect();
    for &node in &queue { visited[node] = true; }

    let mut head = 0;
    while head < queue.len() {
        let node = queue[head];
        head += 1;
        for &donor in donors.neighbors_of(node) {
            if !visited[donor] {
                visited[donor] = true;
                queue.push(donor);
            }
        }
    }

    if queue.len() == n {
        Ok(queue)
    } else {
        Err((0..n).filter(|&i| !visited[i]).collect())
    }
}

/// Every node draining into `root`, `root` included. Uses an explicit stack
/// so long reach chains cannot exhaust the call stack.
pub fn collect_upstream(donors: &CsrFlowGraph, root: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        out.push(node);
        stack.extend_from_slice(donors.neighbors_of(node));
    }
    out
}
