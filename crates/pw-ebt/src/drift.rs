use crate::model::{Chain, RuleSet};
use pw_core::line_diff;
use std::fmt::Write;

/// Renders the model in `ebtables -L` layout, skipping deleted chain slots.
pub fn render_listing(rules: &RuleSet) -> String {
    render(rules, |chain| !chain.is_placeholder())
}

/// Line diff of what a deploy of `desired` would change in `live`.
///
/// Both sides are compared as they would be deployed: reference counts are
/// re-derived and unreferenced chains are left out. Returns `None` when the
/// two are equivalent.
pub fn diff_rulesets(live: &RuleSet, desired: &RuleSet) -> Option<String> {
    let mut live = live.clone();
    let mut desired = desired.clone();
    live.update_refcounts();
    desired.update_refcounts();

    let before = render(&live, Chain::is_deployable);
    let after = render(&desired, Chain::is_deployable);
    line_diff(&before, &after)
}

fn render(rules: &RuleSet, keep: impl Fn(&Chain) -> bool) -> String {
    let mut out = String::new();
    for table in rules.tables() {
        let _ = writeln!(out, "Bridge table: {}\n", table.name());
        for chain in table.chains().iter().filter(|c| keep(c)) {
            let _ = writeln!(
                out,
                "Bridge chain: {}, entries: {}, policy: {}",
                chain.name(),
                chain.rules().len(),
                chain.policy()
            );
            for rule in chain.rules() {
                let _ = writeln!(out, "{}", rule.as_str());
            }
            out.push('\n');
        }
    }
    out
}
