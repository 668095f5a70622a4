/// Drainage Network Topology
///
/// A river basin as a directed acyclic graph of hillslope-links. Each link
/// knows its direct tributaries (upstream) and the single link it drains into
/// (downstream, `None` at the network outlet), plus the physical attributes
/// the hydraulic formulas need.
///
/// Built once per run from two inputs: the topology (`.rvr`) and the link
/// parameters (`.prm`). Immutable afterwards and shared read-only by every
/// timestep.

pub mod files;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::graph::{self, CsrFlowGraph};

pub use files::{parse_prm, parse_rvr, read_prm, read_rvr};

/// Hillslope-link identifier as used by the hydrological model.
pub type LinkId = u32;

/// Physical attributes of a link, as listed in the parameter file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkAttributes {
    /// Total drainage area upstream of the link outlet (km²).
    pub upstream_area: f64,
    /// Area of the hillslope draining laterally into the link (km²).
    pub hillslope_area: f64,
    /// Channel reach length (km).
    pub length: f64,
}

/// A node of the drainage network.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkLink {
    pub id: LinkId,
    /// Direct tributaries, in declaration order.
    pub upstream: Vec<LinkId>,
    pub downstream: Option<LinkId>,
    pub attributes: LinkAttributes,
}

// ---------------------------------------------------------------------------
// Topology (adjacency only, before parameters are attached)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologyNode {
    pub upstream: Vec<LinkId>,
    pub downstream: Option<LinkId>,
}

/// Adjacency as declared by a topology description.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Link count announced by the file header.
    pub declared_links: usize,
    /// Number of primary entries (link id + tributary line) actually read.
    pub primary_entries: usize,
    pub nodes: BTreeMap<LinkId, TopologyNode>,
}

impl Topology {
    pub fn new(declared_links: usize) -> Self {
        Self { declared_links, ..Default::default() }
    }

    /// Registers a primary entry: `link` with its direct tributaries.
    ///
    /// Tributaries that never get an entry of their own are still created as
    /// nodes. A tributary already draining into another link is rejected since
    /// a link has at most one downstream neighbour.
    pub fn add_link(&mut self, link: LinkId, tributaries: &[LinkId]) -> Result<()> {
        self.primary_entries += 1;
        self.nodes.entry(link).or_default();
        for &up in tributaries {
            if up == link {
                return Err(Error::InconsistentTopology {
                    message: format!("link {link} lists itself as a tributary"),
                });
            }
            let node = self.nodes.entry(up).or_default();
            match node.downstream {
                Some(existing) if existing != link => {
                    return Err(Error::InconsistentTopology {
                        message: format!(
                            "link {up} drains into both {existing} and {link}"
                        ),
                    });
                }
                _ => node.downstream = Some(link),
            }
            if let Some(parent) = self.nodes.get_mut(&link) {
                if !parent.upstream.contains(&up) {
                    parent.upstream.push(up);
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize { self.nodes.len() }

    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }
}

/// Parameter records as read from a parameter description.
#[derive(Debug, Clone, Default)]
pub struct LinkParameters {
    /// Attribute count per link announced by the file header.
    pub declared_fields: usize,
    pub entries: Vec<(LinkId, LinkAttributes)>,
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// The assembled, validated drainage network.
#[derive(Debug, Clone)]
pub struct Network {
    links: BTreeMap<LinkId, NetworkLink>,
    ids: Vec<LinkId>,
    index: HashMap<LinkId, usize>,
    donors: CsrFlowGraph,
}

impl Network {
    /// Attaches parameters to a topology and validates the result.
    ///
    /// Fails when a parameterized link is absent from the topology, when the
    /// number of parameterized links differs from the number of topology
    /// links, or when the adjacency contains a cycle.
    pub fn assemble(topology: Topology, params: LinkParameters) -> Result<Self> {
        if topology.declared_links != topology.primary_entries {
            warn!(
                declared = topology.declared_links,
                read = topology.primary_entries,
                "topology header disagrees with the number of entries"
            );
        }

        let mut attributes: BTreeMap<LinkId, LinkAttributes> = BTreeMap::new();
        for (link, attrs) in params.entries {
            if !topology.nodes.contains_key(&link) {
                return Err(Error::InconsistentTopology {
                    message: format!("parameters given for link {link}, which is not in the topology"),
                });
            }
            if attributes.insert(link, attrs).is_some() {
                return Err(Error::InconsistentTopology {
                    message: format!("parameters given twice for link {link}"),
                });
            }
        }
        if attributes.len() != topology.nodes.len() {
            let missing: Vec<LinkId> = topology
                .nodes
                .keys()
                .filter(|id| !attributes.contains_key(id))
                .take(5)
                .copied()
                .collect();
            return Err(Error::InconsistentTopology {
                message: format!(
                    "parameters set for {} out of {} links (first missing: {:?})",
                    attributes.len(),
                    topology.nodes.len(),
                    missing
                ),
            });
        }

        let mut links = BTreeMap::new();
        for (id, node) in topology.nodes {
            let attributes = attributes[&id];
            links.insert(id, NetworkLink {
                id,
                upstream: node.upstream,
                downstream: node.downstream,
                attributes,
            });
        }
        Self::from_links(links)
    }

    fn from_links(links: BTreeMap<LinkId, NetworkLink>) -> Result<Self> {
        let ids: Vec<LinkId> = links.keys().copied().collect();
        let index: HashMap<LinkId, usize> = ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let receivers: Vec<Option<usize>> = ids
            .iter()
            .map(|id| links[id].downstream.and_then(|d| index.get(&d).copied()))
            .collect();
        let donors = CsrFlowGraph::from_receivers(&receivers);

        if let Err(stuck) = graph::stack_order(&receivers, &donors) {
            let sample: Vec<LinkId> = stuck.iter().take(5).map(|&i| ids[i]).collect();
            return Err(Error::InconsistentTopology {
                message: format!(
                    "{} links never reach an outlet (cycle through {:?})",
                    stuck.len(),
                    sample
                ),
            });
        }
        debug!(links = ids.len(), edges = donors.num_edges(), "network assembled");

        Ok(Self { links, ids, index, donors })
    }

    pub fn len(&self) -> usize { self.ids.len() }

    pub fn is_empty(&self) -> bool { self.ids.is_empty() }

    pub fn contains(&self, link: LinkId) -> bool { self.links.contains_key(&link) }

    pub fn get(&self, link: LinkId) -> Option<&NetworkLink> { self.links.get(&link) }

    /// Link ids in ascending order.
    pub fn link_ids(&self) -> &[LinkId] { &self.ids }

    pub fn links(&self) -> impl Iterator<Item = &NetworkLink> { self.links.values() }

    pub fn upstream_of(&self, link: LinkId) -> &[LinkId] {
        self.links.get(&link).map(|l| l.upstream.as_slice()).unwrap_or(&[])
    }

    pub fn downstream_of(&self, link: LinkId) -> Option<LinkId> {
        self.links.get(&link).and_then(|l| l.downstream)
    }

    pub fn attributes(&self, link: LinkId) -> Option<&LinkAttributes> {
        self.links.get(&link).map(|l| &l.attributes)
    }

    /// Links without a downstream neighbour.
    pub fn outlets(&self) -> Vec<LinkId> {
        self.links.values().filter(|l| l.downstream.is_none()).map(|l| l.id).collect()
    }

    /// Every link draining into `link`, `link` included, in ascending order.
    pub fn basin_of(&self, link: LinkId) -> Result<Vec<LinkId>> {
        let root = *self.index.get(&link).ok_or_else(|| Error::UnknownLink {
            link,
            context: "basin query".into(),
        })?;
        let mut basin: Vec<LinkId> = graph::collect_upstream(&self.donors, root)
            .into_iter()
            .map(|i| self.ids[i])
            .collect();
        basin.sort_unstable();
        Ok(basin)
    }
}
