//! Partition scenarios exercised by the simulator.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// DF-001: two peers side by side on a bounded strip
    TwoPeerStrip,

    /// DF-002: four peers in a toroidal ring
    Ring,

    /// DF-003: bounded 3x3 grid with corner handovers
    SquareGrid,

    /// DF-004: 3x3 torus, every peer has eight neighbours
    TorusGrid,

    /// DF-005: one publish topic blocked, peers stall until shutdown
    StalledNeighbour,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::TwoPeerStrip,
            ScenarioId::Ring,
            ScenarioId::SquareGrid,
            ScenarioId::TorusGrid,
            ScenarioId::StalledNeighbour,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::TwoPeerStrip => "two_peer_strip",
            ScenarioId::Ring => "ring",
            ScenarioId::SquareGrid => "square_grid",
            ScenarioId::TorusGrid => "torus_grid",
            ScenarioId::StalledNeighbour => "stalled_neighbour",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::TwoPeerStrip => "2 peers on a 100x10 strip, walkers cross the shared border",
            ScenarioId::Ring => "4 peers on a toroidal 200x20 ring, handovers wrap around",
            ScenarioId::SquareGrid => "3x3 bounded grid, diagonal bands hand over via corners",
            ScenarioId::TorusGrid => "3x3 torus from 9 peers, 8 neighbours everywhere",
            ScenarioId::StalledNeighbour => "blocked topic stalls the step gate, shutdown releases it",
        }
    }

    /// True if peers are expected to stop before their last step.
    pub fn expects_stall(&self) -> bool {
        matches!(self, ScenarioId::StalledNeighbour)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "two_peer_strip" | "strip" | "df-001" => Ok(ScenarioId::TwoPeerStrip),
            "ring" | "df-002" => Ok(ScenarioId::Ring),
            "square_grid" | "grid" | "df-003" => Ok(ScenarioId::SquareGrid),
            "torus_grid" | "torus" | "df-004" => Ok(ScenarioId::TorusGrid),
            "stalled_neighbour" | "stall" | "df-005" => Ok(ScenarioId::StalledNeighbour),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
            assert_eq!(scenario.to_string(), scenario.name());
        }
        assert_eq!("DF-004".parse::<ScenarioId>(), Ok(ScenarioId::TorusGrid));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
