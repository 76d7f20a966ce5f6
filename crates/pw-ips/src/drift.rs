use crate::model::SetBase;
use pw_core::{IpsetConfig, line_diff};
use std::fmt::Write;

/// Renders the model the way `ipset save` prints it.
pub fn render_save(sets: &SetBase, ipset: &IpsetConfig) -> String {
    let options = ipset.create_options();
    let mut out = String::new();
    for set in sets.sets() {
        let _ = writeln!(out, "create {} {}", set.name(), options);
        for network in set.networks() {
            let _ = writeln!(out, "add {} {}", set.name(), network);
        }
    }
    out
}

/// Line diff between live and desired sets, or `None` when they match.
pub fn diff_setbases(live: &SetBase, desired: &SetBase, ipset: &IpsetConfig) -> Option<String> {
    line_diff(&render_save(live, ipset), &render_save(desired, ipset))
}
