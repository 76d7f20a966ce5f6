use serde::{Deserialize, Serialize};

/// Snapshot of what both handlers currently hold
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyStatus {
    pub tables: Vec<TableStatus>,
    pub sets: Vec<SetStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStatus {
    pub name: String,
    /// Chain slots, placeholders included
    pub chains: usize,
    /// Chains that would be deployed (referenced, not placeholders)
    pub live_chains: usize,
    pub rules: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetStatus {
    pub name: String,
    pub networks: usize,
    pub ref_count: u32,
}

/// Outcome of reading a backend dump back into a model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseSummary {
    /// Objects added to the model, one per accepted line
    pub accepted: usize,
    /// Lines that were not understood, or whose parent object was missing
    pub dropped: usize,
}

impl PolicyStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn display(&self) {
        println!("📊 Policy Status\n");

        println!("🌉 Bridge tables ({}):", self.tables.len());
        if self.tables.is_empty() {
            println!("  (none)");
        } else {
            for table in &self.tables {
                println!(
                    "  • {} - {} chains ({} live), {} rules",
                    table.name, table.chains, table.live_chains, table.rules
                );
            }
        }

        println!("\n📦 Address sets ({}):", self.sets.len());
        if self.sets.is_empty() {
            println!("  (none)");
        } else {
            for set in &self.sets {
                let state = if set.ref_count > 0 { "active" } else { "unused" };
                println!("  • {} [{}] - {} networks", set.name, state, set.networks);
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_json() {
        let status = PolicyStatus {
            tables: vec![TableStatus {
                name: "filter".into(),
                chains: 2,
                live_chains: 1,
                rules: 3,
            }],
            sets: vec![SetStatus {
                name: "sg-123".into(),
                networks: 2,
                ref_count: 3,
            }],
        };

        let value: serde_json::Value =
            serde_json::from_str(&status.to_json().expect("json")).expect("valid JSON");
        assert_eq!(value["tables"][0]["live_chains"], 1);
        assert_eq!(value["sets"][0]["name"], "sg-123");
    }
}
