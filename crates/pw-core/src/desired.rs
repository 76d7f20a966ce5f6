use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Policy an operator wants live, as loaded from YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DesiredState {
    #[serde(default)]
    pub tables: Vec<TableSpec>,
    #[serde(default)]
    pub sets: Vec<SetSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    #[serde(default)]
    pub chains: Vec<ChainSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSpec {
    pub name: String,
    #[serde(default = "default_policy")]
    pub policy: String,
    #[serde(default)]
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSpec {
    pub name: String,
    /// "a.b.c.d/len" or a bare host address
    #[serde(default)]
    pub networks: Vec<String>,
}

impl DesiredState {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse desired state YAML")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read desired state from {:?}", path))?;
        Self::from_yaml(&content)
    }
}

fn default_policy() -> String {
    "ACCEPT".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tables_and_sets() {
        let yaml = r#"
tables:
  - name: filter
    chains:
      - name: FORWARD
        rules:
          - "-j LOGDROP"
      - name: LOGDROP
        policy: DROP
sets:
  - name: sg-123
    networks: ["10.0.0.0/24", "10.0.1.5"]
"#;
        let state = DesiredState::from_yaml(yaml).expect("desired state");
        assert_eq!(state.tables.len(), 1);
        let chains = &state.tables[0].chains;
        assert_eq!(chains[0].policy, "ACCEPT");
        assert_eq!(chains[0].rules, vec!["-j LOGDROP".to_string()]);
        assert_eq!(chains[1].policy, "DROP");
        assert!(chains[1].rules.is_empty());
        assert_eq!(state.sets[0].networks.len(), 2);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let state = DesiredState::from_yaml("sets: []").expect("desired state");
        assert!(state.tables.is_empty());
        assert!(state.sets.is_empty());
    }
}
