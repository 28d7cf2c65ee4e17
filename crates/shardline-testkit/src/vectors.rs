//! Scenario vectors for fragmentation and transfer tests.
//!
//! Each vector pins the fragment layout a given source size and
//! configuration must produce.

/// A fragmentation scenario with its expected layout.
#[derive(Debug, Clone)]
pub struct ScenarioVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Source length in bytes.
    pub source_len: usize,
    pub fragment_size: usize,
    pub max_parts: usize,
    /// Expected fragment lengths, in index order.
    pub expected_lengths: &'static [usize],
}

impl ScenarioVector {
    /// Bytes the expected fragments cover.
    pub fn covered(&self) -> usize {
        self.expected_lengths.iter().sum()
    }

    /// True when the layout leaves part of the source unfragmented.
    pub fn truncates(&self) -> bool {
        self.covered() < self.source_len
    }
}

/// Get all scenario vectors.
pub fn all_scenarios() -> Vec<ScenarioVector> {
    vec![
        ScenarioVector {
            name: "million bytes in 300k fragments",
            source_len: 1_000_000,
            fragment_size: 300_000,
            max_parts: 10,
            expected_lengths: &[300_000, 300_000, 300_000, 100_000],
        },
        ScenarioVector {
            name: "exact multiple",
            source_len: 4096,
            fragment_size: 1024,
            max_parts: 8,
            expected_lengths: &[1024, 1024, 1024, 1024],
        },
        ScenarioVector {
            name: "single short fragment",
            source_len: 10,
            fragment_size: 1024,
            max_parts: 4,
            expected_lengths: &[10],
        },
        ScenarioVector {
            name: "empty source",
            source_len: 0,
            fragment_size: 1024,
            max_parts: 4,
            expected_lengths: &[],
        },
        ScenarioVector {
            name: "truncated by max_parts",
            source_len: 1000,
            fragment_size: 100,
            max_parts: 3,
            expected_lengths: &[100, 100, 100],
        },
        ScenarioVector {
            name: "four fragments for upload failure",
            source_len: 4000,
            fragment_size: 1000,
            max_parts: 4,
            expected_lengths: &[1000, 1000, 1000, 1000],
        },
    ]
}

/// Look up a scenario by name.
pub fn scenario(name: &str) -> Option<ScenarioVector> {
    all_scenarios().into_iter().find(|v| v.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardline_core::plan_fragments;

    #[test]
    fn test_scenarios_match_plan() {
        for v in all_scenarios() {
            let plan = plan_fragments(v.source_len as u64, v.fragment_size, v.max_parts).unwrap();
            let lengths: Vec<usize> = plan.iter().map(|s| s.length).collect();
            assert_eq!(lengths, v.expected_lengths, "{}", v.name);
        }
    }

    #[test]
    fn test_truncation_flag() {
        assert!(scenario("truncated by max_parts").unwrap().truncates());
        assert!(!scenario("exact multiple").unwrap().truncates());
    }
}
