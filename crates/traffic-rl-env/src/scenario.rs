//! Static network topology used to size and normalise observations

use serde::{Deserialize, Serialize};

use traffic_rl_core::{EnvError, Result};

/// One directed road segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Edge identifier as reported by the simulator
    pub id: String,
    /// Length in meters
    pub length: f64,
    /// Number of lanes
    pub lanes: usize,
}

impl EdgeSpec {
    /// Create an edge description
    pub fn new(id: impl Into<String>, length: f64, lanes: usize) -> Self {
        Self {
            id: id.into(),
            length,
            lanes,
        }
    }
}

/// Network topology and the constants derived from it.
///
/// Nothing here changes during an episode, so everything computed from a
/// scenario (observation sizes, normalisers) is fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name, also used to locate the emission log
    pub name: String,
    /// Edges in network order
    pub edges: Vec<EdgeSpec>,
    /// Speed limit used for normalisation, m/s
    pub max_speed: f64,
    /// Lane scaling factor of the network
    #[serde(default = "default_scaling")]
    pub scaling: usize,
}

fn default_scaling() -> usize {
    1
}

impl Scenario {
    /// Create and validate a scenario
    pub fn new(name: impl Into<String>, edges: Vec<EdgeSpec>, max_speed: f64) -> Result<Self> {
        let scenario = Self {
            name: name.into(),
            edges,
            max_speed,
            scaling: 1,
        };
        scenario.validate()?;
        Ok(scenario)
    }

    /// Open merge network: a single-lane highway joined by an on-ramp
    #[must_use]
    pub fn merge() -> Self {
        Self {
            name: "merge".to_string(),
            edges: vec![
                EdgeSpec::new("inflow_highway", 100.0, 1),
                EdgeSpec::new("left", 200.0, 1),
                EdgeSpec::new("center", 100.0, 1),
                EdgeSpec::new("inflow_merge", 100.0, 1),
                EdgeSpec::new("bottom", 100.0, 1),
            ],
            max_speed: 30.0,
            scaling: 1,
        }
    }

    /// Toll booth and ramp meter bottleneck with edges "1".."5".
    ///
    /// Edge "1" runs up to the toll booth, "2" from the toll booth to the
    /// ramp meter, "3" past the ramp meter; "4" and "5" narrow down.
    #[must_use]
    pub fn bottleneck(scaling: usize) -> Self {
        let scaling = scaling.max(1);
        let lanes = [4, 4, 4, 2, 1];
        Self {
            name: "bay_bridge_toll".to_string(),
            edges: lanes
                .iter()
                .enumerate()
                .map(|(i, l)| EdgeSpec::new((i + 1).to_string(), 100.0, l * scaling))
                .collect(),
            max_speed: 55.0,
            scaling,
        }
    }

    /// Total network length
    #[must_use]
    pub fn length(&self) -> f64 {
        self.edges.iter().map(|e| e.length).sum()
    }

    /// Largest lane count of any edge
    #[must_use]
    pub fn num_lanes(&self) -> usize {
        self.edges.iter().map(|e| e.lanes).max().unwrap_or(0)
    }

    /// Number of edges
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Look up an edge
    #[must_use]
    pub fn edge(&self, id: &str) -> Option<&EdgeSpec> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// 1-based position of an edge in network order
    #[must_use]
    pub fn edge_ordinal(&self, id: &str) -> Option<usize> {
        self.edges.iter().position(|e| e.id == id).map(|i| i + 1)
    }

    /// Absolute distance from the network start to the beginning of `id`
    #[must_use]
    pub fn edge_start(&self, id: &str) -> Option<f64> {
        let mut offset = 0.0;
        for edge in &self.edges {
            if edge.id == id {
                return Some(offset);
            }
            offset += edge.length;
        }
        None
    }

    fn validate(&self) -> Result<()> {
        if self.edges.is_empty() {
            return Err(EnvError::InvalidParameter {
                name: "edges".to_string(),
                reason: "scenario has no edges".to_string(),
            });
        }
        if let Some(edge) = self.edges.iter().find(|e| e.length <= 0.0 || e.lanes == 0) {
            return Err(EnvError::InvalidParameter {
                name: "edges".to_string(),
                reason: format!("edge {} needs positive length and lanes", edge.id),
            });
        }
        if self.max_speed <= 0.0 {
            return Err(EnvError::InvalidParameter {
                name: "max_speed".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bottleneck_scales_lanes() {
        let scenario = Scenario::bottleneck(2);
        assert_eq!(scenario.num_lanes(), 8);
        assert_eq!(scenario.num_edges(), 5);
        assert_eq!(scenario.edge("5").unwrap().lanes, 2);
        assert_eq!(scenario.edge_ordinal("3"), Some(3));
        assert_eq!(scenario.edge_start("3"), Some(200.0));
        assert_eq!(scenario.edge_ordinal(":junction_0"), None);
    }

    #[test]
    fn merge_length_is_sum_of_edges() {
        assert_eq!(Scenario::merge().length(), 600.0);
    }

    #[test]
    fn rejects_empty_topology() {
        assert!(Scenario::new("empty", vec![], 30.0).is_err());
        assert!(Scenario::new("flat", vec![EdgeSpec::new("a", 0.0, 1)], 30.0).is_err());
    }
}
