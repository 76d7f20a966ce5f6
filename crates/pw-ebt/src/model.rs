use pw_core::{Error, Result, TableStatus, require, try_push};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Traffic-direction entry points; never garbage-collected.
pub const BUILTIN_CHAINS: [&str; 5] = ["INPUT", "FORWARD", "OUTPUT", "PREROUTING", "POSTROUTING"];

/// Name given to a logically deleted chain whose slot is retained.
pub const PLACEHOLDER_CHAIN: &str = "EMPTY";

// First "-j" marker, then the token that follows it.
static JUMP_TARGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-j[-j]*\s*(\S+)").expect("jump target pattern is valid"));

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_CHAINS.contains(&name)
}

/// One opaque ebtables rule fragment, e.g. `-p IPv4 -j EUCA_ALLOW`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    text: String,
}

impl Rule {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Chain named after the jump marker, if any.
    pub fn jump_target(&self) -> Option<&str> {
        JUMP_TARGET
            .captures(&self.text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    name: String,
    policy: String,
    counters: String,
    ref_count: u32,
    rules: Vec<Rule>,
}

impl Chain {
    fn new(name: &str, policy: &str, counters: &str) -> Self {
        let mut chain = Self {
            name: name.to_string(),
            policy: policy.to_string(),
            counters: counters.to_string(),
            ref_count: 0,
            rules: Vec::new(),
        };
        chain.ref_count = chain.seed_ref_count();
        chain
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &str {
        &self.policy
    }

    pub fn counters(&self) -> &str {
        &self.counters
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_builtin(&self) -> bool {
        is_builtin(&self.name)
    }

    pub fn is_placeholder(&self) -> bool {
        self.name == PLACEHOLDER_CHAIN
    }

    /// Referenced and not deleted: what a deploy pushes to the backend.
    pub fn is_deployable(&self) -> bool {
        !self.is_placeholder() && self.ref_count > 0
    }

    pub fn find_rule(&self, text: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.text == text)
    }

    fn seed_ref_count(&self) -> u32 {
        u32::from(self.is_builtin())
    }

    fn flush(&mut self) {
        self.rules = Vec::new();
        self.counters.clear();
    }

    fn mark_deleted(&mut self) {
        self.name = PLACEHOLDER_CHAIN.to_string();
        self.policy.clear();
        self.ref_count = 0;
        self.flush();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    name: String,
    chains: Vec<Chain>,
}

impl Table {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            chains: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn find_chain(&self, name: &str) -> Option<&Chain> {
        self.chains.iter().find(|chain| chain.name == name)
    }

    fn find_chain_mut(&mut self, name: &str) -> Option<&mut Chain> {
        self.chains.iter_mut().find(|chain| chain.name == name)
    }

    fn delete_matching(&mut self, pattern: &str) -> usize {
        let mut deleted = 0;
        for chain in self.chains.iter_mut().filter(|c| c.name.contains(pattern)) {
            debug!(table = %self.name, chain = %chain.name, pattern, "deleting chain");
            chain.mark_deleted();
            deleted += 1;
        }
        deleted
    }
}

/// In-memory mirror of the bridge-filtering rule base: tables → chains → rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    tables: Vec<Table>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Releases every table, chain and rule.
    pub fn clear(&mut self) {
        self.tables = Vec::new();
    }

    pub fn add_table(&mut self, name: &str) -> Result<()> {
        require("table name", name)?;
        debug!(table = name, "adding table");

        if self.find_table(name).is_none() {
            try_push(&mut self.tables, Table::new(name))?;
        }
        Ok(())
    }

    pub fn add_chain(&mut self, table: &str, chain: &str, policy: &str, counters: &str) -> Result<()> {
        require("chain name", chain)?;
        debug!(table, chain, "adding chain");

        let table = self.table_mut(table)?;
        if table.find_chain(chain).is_none() {
            try_push(&mut table.chains, Chain::new(chain, policy, counters))?;
        }
        Ok(())
    }

    pub fn add_rule(&mut self, table: &str, chain: &str, text: &str) -> Result<()> {
        require("rule", text)?;
        debug!(table, chain, rule = text, "adding rule");

        let chain = self.chain_mut(table, chain)?;
        if chain.find_rule(text).is_none() {
            try_push(&mut chain.rules, Rule::new(text))?;
        }
        Ok(())
    }

    pub fn find_table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|table| table.name == name)
    }

    pub fn find_chain(&self, table: &str, chain: &str) -> Option<&Chain> {
        self.find_table(table)?.find_chain(chain)
    }

    pub fn find_rule(&self, table: &str, chain: &str, text: &str) -> Option<&Rule> {
        self.find_chain(table, chain)?.find_rule(text)
    }

    /// Re-derives every chain's reference count from the jump targets of the
    /// rules in its own table. Built-in chains keep their seed of one.
    pub fn update_refcounts(&mut self) {
        for table in &mut self.tables {
            let targets: Vec<String> = table
                .chains
                .iter()
                .filter(|chain| !chain.is_placeholder())
                .flat_map(|chain| chain.rules.iter().filter_map(Rule::jump_target))
                .map(str::to_string)
                .collect();

            for chain in table.chains.iter_mut().filter(|c| !c.is_placeholder()) {
                let refs = targets.iter().filter(|t| **t == chain.name).count();
                let refs = u32::try_from(refs).unwrap_or(u32::MAX);
                if refs > 0 {
                    debug!(table = %table.name, chain = %chain.name, refs, "found references to chain");
                }
                chain.ref_count = chain.seed_ref_count().saturating_add(refs);
            }
        }
    }

    /// Deletes every chain whose name contains the first empty chain's name.
    /// Placeholders are never picked. Returns the picked name, or `None` when
    /// no chain is empty.
    pub fn prune_first_empty_chain(&mut self, table: &str) -> Result<Option<String>> {
        let table = self.table_mut(table)?;
        let Some(name) = table
            .chains
            .iter()
            .find(|c| c.rules.is_empty() && !c.is_placeholder())
            .map(|c| c.name.clone())
        else {
            return Ok(None);
        };

        table.delete_matching(&name);
        Ok(Some(name))
    }

    /// Marks every chain whose name contains `pattern` as deleted and returns
    /// how many were hit.
    pub fn delete_chains_matching(&mut self, table: &str, pattern: &str) -> Result<usize> {
        require("chain pattern", pattern)?;
        Ok(self.table_mut(table)?.delete_matching(pattern))
    }

    pub fn flush_chain(&mut self, table: &str, chain: &str) -> Result<()> {
        self.chain_mut(table, chain)?.flush();
        Ok(())
    }

    /// Removes one rule by exact text; an emptied chain also loses its counters.
    pub fn flush_rule(&mut self, table: &str, chain: &str, text: &str) -> Result<()> {
        require("rule", text)?;
        let target = self.chain_mut(table, chain)?;

        if target.find_rule(text).is_none() {
            debug!(table, chain, rule = text, "rule not present in chain");
            return Err(Error::not_found("rule", text));
        }

        target.rules.retain(|rule| rule.text != text);
        if target.rules.is_empty() {
            target.flush();
        }
        Ok(())
    }

    pub fn table_status(&self) -> Vec<TableStatus> {
        self.tables
            .iter()
            .map(|table| TableStatus {
                name: table.name.clone(),
                chains: table.chains.len(),
                live_chains: table.chains.iter().filter(|c| c.is_deployable()).count(),
                rules: table.chains.iter().map(|c| c.rules.len()).sum(),
            })
            .collect()
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        require("table name", name)?;
        self.tables
            .iter_mut()
            .find(|table| table.name == name)
            .ok_or_else(|| Error::not_found("table", name))
    }

    fn chain_mut(&mut self, table: &str, chain: &str) -> Result<&mut Chain> {
        require("chain name", chain)?;
        let owner = self.table_mut(table)?;
        let owner_name = owner.name.clone();
        owner
            .find_chain_mut(chain)
            .ok_or_else(|| Error::not_found("chain", format!("{}/{}", owner_name, chain)))
    }
}
