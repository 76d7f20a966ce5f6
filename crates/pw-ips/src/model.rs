use ipnet::Ipv4Net;
use pw_core::{Error, Result, SetStatus, require, try_push};
use std::net::Ipv4Addr;
use tracing::debug;

/// Prefix length used when an address is added without one.
pub const HOST_PREFIX: u8 = 32;

/// Parses a dotted-quad address and prefix into a member network.
/// Host bits are kept as given.
pub fn parse_network(address: &str, prefix: u8) -> Result<Ipv4Net> {
    require("address", address)?;
    let addr: Ipv4Addr = address
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("not an IPv4 address: {}", address)))?;
    Ipv4Net::new(addr, prefix)
        .map_err(|_| Error::InvalidArgument(format!("prefix length out of range: {}", prefix)))
}

/// Named group of networks, e.g. the members of one security group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpSet {
    name: String,
    ref_count: u32,
    networks: Vec<Ipv4Net>,
}

impl IpSet {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ref_count: 1,
            networks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn networks(&self) -> &[Ipv4Net] {
        &self.networks
    }

    pub fn find_network(&self, network: &Ipv4Net) -> Option<&Ipv4Net> {
        // Ipv4Net equality covers both address and prefix length.
        self.networks.iter().find(|&n| n == network)
    }

    fn flush(&mut self) {
        self.networks = Vec::new();
        self.ref_count = 0;
    }
}

/// Every address set the handler knows about, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetBase {
    sets: Vec<IpSet>,
}

impl SetBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sets(&self) -> &[IpSet] {
        &self.sets
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn clear(&mut self) {
        self.sets = Vec::new();
    }

    pub fn add_set(&mut self, name: &str) -> Result<()> {
        require("set name", name)?;
        debug!(set = name, "adding set");

        if self.find_set(name).is_none() {
            try_push(&mut self.sets, IpSet::new(name))?;
        }
        Ok(())
    }

    pub fn add_network(&mut self, set: &str, address: &str, prefix: u8) -> Result<()> {
        let network = parse_network(address, prefix)?;
        let target = self.set_mut(set)?;

        if target.find_network(&network).is_none() {
            debug!(set, %network, "adding network");
            try_push(&mut target.networks, network)?;
            target.ref_count = target.ref_count.saturating_add(1);
        }
        Ok(())
    }

    pub fn add_address(&mut self, set: &str, address: &str) -> Result<()> {
        self.add_network(set, address, HOST_PREFIX)
    }

    pub fn find_set(&self, name: &str) -> Option<&IpSet> {
        self.sets.iter().find(|set| set.name == name)
    }

    /// Exact (address, prefix) lookup; an unparseable address is simply absent.
    pub fn find_network(&self, set: &str, address: &str, prefix: u8) -> Option<&Ipv4Net> {
        let network = parse_network(address, prefix).ok()?;
        self.find_set(set)?.find_network(&network)
    }

    pub fn find_address(&self, set: &str, address: &str) -> Option<&Ipv4Net> {
        self.find_network(set, address, HOST_PREFIX)
    }

    /// Drops every network and zeroes the reference count; the set stays.
    pub fn flush_set(&mut self, set: &str) -> Result<()> {
        self.set_mut(set)?.flush();
        Ok(())
    }

    /// Flushes every set whose name contains `pattern`, returning how many.
    pub fn delete_sets_matching(&mut self, pattern: &str) -> Result<usize> {
        require("set pattern", pattern)?;
        let mut deleted = 0;
        for set in self.sets.iter_mut().filter(|s| s.name.contains(pattern)) {
            debug!(set = %set.name, pattern, "deleting set");
            set.flush();
            deleted += 1;
        }
        Ok(deleted)
    }

    pub fn set_status(&self) -> Vec<SetStatus> {
        self.sets
            .iter()
            .map(|set| SetStatus {
                name: set.name.clone(),
                networks: set.networks.len(),
                ref_count: set.ref_count,
            })
            .collect()
    }

    /// Forgets a set entirely, as `ipset destroy` does.
    pub(crate) fn destroy_set(&mut self, name: &str) {
        self.sets.retain(|set| set.name != name);
    }

    fn set_mut(&mut self, name: &str) -> Result<&mut IpSet> {
        require("set name", name)?;
        self.sets
            .iter_mut()
            .find(|set| set.name == name)
            .ok_or_else(|| Error::not_found("set", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sg() -> SetBase {
        let mut sets = SetBase::new();
        sets.add_set("sg-123").unwrap();
        sets
    }

    #[test]
    fn new_set_is_seeded_with_one_reference() {
        let sets = sg();
        let set = sets.find_set("sg-123").unwrap();
        assert_eq!(set.ref_count(), 1);
        assert!(set.networks().is_empty());
    }

    #[test]
    fn duplicate_network_is_a_no_op() {
        let mut sets = sg();
        sets.add_network("sg-123", "10.0.0.0", 24).unwrap();
        sets.add_network("sg-123", "10.0.0.0", 24).unwrap();

        let set = sets.find_set("sg-123").unwrap();
        assert_eq!(set.networks().len(), 1);
        assert_eq!(set.ref_count(), 2);
    }

    #[test]
    fn same_address_with_different_prefix_is_distinct() {
        let mut sets = sg();
        sets.add_network("sg-123", "10.0.0.0", 24).unwrap();
        sets.add_network("sg-123", "10.0.0.0", 16).unwrap();
        assert_eq!(sets.find_set("sg-123").unwrap().networks().len(), 2);
    }

    #[test]
    fn refcount_tracks_network_count() {
        let mut sets = sg();
        for addr in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            sets.add_address("sg-123", addr).unwrap();
        }
        let set = sets.find_set("sg-123").unwrap();
        assert!(set.ref_count() as usize >= set.networks().len());
        assert_eq!(set.ref_count(), 4);
    }

    #[test]
    fn plain_address_is_a_host_network() {
        let mut sets = sg();
        sets.add_address("sg-123", "10.0.1.5").unwrap();
        assert_eq!(
            sets.find_network("sg-123", "10.0.1.5", 32).map(ToString::to_string),
            Some("10.0.1.5/32".to_string())
        );
        assert!(sets.find_address("sg-123", "10.0.1.5").is_some());
        assert!(sets.find_address("sg-123", "10.0.1.6").is_none());
    }

    #[test]
    fn host_bits_are_kept() {
        let mut sets = sg();
        sets.add_network("sg-123", "10.0.0.7", 24).unwrap();
        assert_eq!(sets.find_set("sg-123").unwrap().networks()[0].to_string(), "10.0.0.7/24");
        assert!(sets.find_network("sg-123", "10.0.0.0", 24).is_none());
    }

    #[test]
    fn invalid_networks_are_rejected() {
        let mut sets = sg();
        assert!(matches!(sets.add_network("sg-123", "10.0.0.0", 33), Err(Error::InvalidArgument(_))));
        assert!(matches!(sets.add_network("sg-123", "", 24), Err(Error::InvalidArgument(_))));
        assert!(matches!(sets.add_address("sg-123", "not-an-ip"), Err(Error::InvalidArgument(_))));
        assert!(sets.find_network("sg-123", "not-an-ip", 24).is_none());
    }

    #[test]
    fn missing_set_is_not_found() {
        let mut sets = SetBase::new();
        assert!(sets.add_address("sg-404", "10.0.0.1").unwrap_err().is_not_found());
        assert!(sets.flush_set("sg-404").unwrap_err().is_not_found());
    }

    #[test]
    fn flush_zeroes_refcount_but_keeps_set() {
        let mut sets = sg();
        sets.add_address("sg-123", "10.0.0.1").unwrap();
        sets.flush_set("sg-123").unwrap();

        let set = sets.find_set("sg-123").expect("set kept");
        assert_eq!(set.ref_count(), 0);
        assert!(set.networks().is_empty());
    }

    #[test]
    fn delete_matching_flushes_by_substring() {
        let mut sets = SetBase::new();
        for name in ["sg-123", "sg-1234", "other"] {
            sets.add_set(name).unwrap();
            sets.add_address(name, "10.0.0.1").unwrap();
        }

        assert_eq!(sets.delete_sets_matching("sg-123").unwrap(), 2);
        assert_eq!(sets.sets().len(), 3);
        assert_eq!(sets.find_set("sg-1234").unwrap().ref_count(), 0);
        assert_eq!(sets.find_set("other").unwrap().ref_count(), 2);
    }

    #[test]
    fn status_reports_counts() {
        let mut sets = sg();
        sets.add_network("sg-123", "10.0.0.0", 24).unwrap();
        let status = sets.set_status();
        assert_eq!(status[0].networks, 1);
        assert_eq!(status[0].ref_count, 2);
    }
}
