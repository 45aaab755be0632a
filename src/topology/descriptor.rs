use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::TopologyError;

/// Parsed form of a compact cluster descriptor
/// `"<M>m<N>n.<b1>-<b2>-...-<bk>"` (an optional `.def` suffix is ignored).
///
/// `M` machines host `N` worker nodes in total. The branching factors
/// describe the k-level tree replicated beneath every machine; its
/// `b1*b2*...*bk` leaves are the machine's nodes, so the product must equal
/// `N / M`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDescriptor {
    pub machines: usize,
    pub nodes: usize,
    pub branching: Vec<usize>,
}

impl ClusterDescriptor {
    pub fn parse(text: &str) -> Result<Self, TopologyError> {
        let malformed = || TopologyError::MalformedDescriptor(text.to_string());
        let trimmed = text.strip_suffix(".def").unwrap_or(text);

        let (counts, levels) = trimmed.split_once('.').ok_or_else(malformed)?;
        let (machines_str, rest) = counts.split_once('m').ok_or_else(malformed)?;
        let nodes_str = rest.strip_suffix('n').ok_or_else(malformed)?;

        let machines: usize = machines_str.parse().map_err(|_| malformed())?;
        let nodes: usize = nodes_str.parse().map_err(|_| malformed())?;
        let branching = levels
            .split('-')
            .map(|b| b.parse::<usize>().map_err(|_| malformed()))
            .collect::<Result<Vec<_>, _>>()?;

        if machines == 0 || nodes == 0 || branching.is_empty() || branching.contains(&0) {
            return Err(malformed());
        }
        if nodes % machines != 0 {
            return Err(TopologyError::IndivisibleNodes {
                descriptor: text.to_string(),
                machines: machines as u64,
                nodes: nodes as u64,
            });
        }

        let per_machine = nodes / machines;
        let product: usize = branching.iter().product();
        if product != per_machine {
            return Err(TopologyError::CountMismatch {
                descriptor: text.to_string(),
                product: product as u64,
                per_machine: per_machine as u64,
            });
        }

        Ok(ClusterDescriptor { machines, nodes, branching })
    }

    pub fn nodes_per_machine(&self) -> usize {
        self.nodes / self.machines
    }

    pub fn num_levels(&self) -> usize {
        self.branching.len()
    }

    /// Number of distinct level-`level` subtrees beneath each machine
    /// (`b1*...*b_level`); 1-indexed.
    pub fn level_width(&self, level: usize) -> usize {
        self.branching[..level].iter().product()
    }

    /// Number of leaves beneath one level-`level` subtree.
    pub fn leaves_below(&self, level: usize) -> usize {
        self.branching[level..].iter().product()
    }
}

impl std::fmt::Display for ClusterDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let levels = self
            .branching
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join("-");
        write!(f, "{}m{}n.{}", self.machines, self.nodes, levels)
    }
}

/// On-disk form of a richer cluster definition: the compact descriptor plus
/// optional explicit names and declared groups.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterDefinitionDto {
    pub descriptor: String,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub machines: Option<Vec<String>>,
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
}

impl ClusterDefinitionDto {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_descriptor() {
        let desc = ClusterDescriptor::parse("4m24n.2-3").unwrap();
        assert_eq!(desc.machines, 4);
        assert_eq!(desc.nodes, 24);
        assert_eq!(desc.branching, vec![2, 3]);
        assert_eq!(desc.nodes_per_machine(), 6);
        assert_eq!(desc.level_width(1), 2);
        assert_eq!(desc.level_width(2), 6);
        assert_eq!(desc.leaves_below(1), 3);
        assert_eq!(desc.to_string(), "4m24n.2-3");
    }

    #[test]
    fn ignores_def_suffix() {
        let desc = ClusterDescriptor::parse("2m8n.2-2.def").unwrap();
        assert_eq!(desc.nodes_per_machine(), 4);
    }

    #[test]
    fn rejects_count_mismatch() {
        // 2*4 = 8 leaves per machine, but 6/3 = 2 nodes per machine.
        let err = ClusterDescriptor::parse("3m6n.2-4").unwrap_err();
        assert!(matches!(err, TopologyError::CountMismatch { .. }), "got {err:?}");
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "m4n.1", "4m.2", "4mXn.2", "2m4n.", "2m4n.0-2", "0m0n.1"] {
            assert!(ClusterDescriptor::parse(bad).is_err(), "'{bad}' should not parse");
        }
    }
}
