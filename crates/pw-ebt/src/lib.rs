//! Bridge rule-table handler: models ebtables tables, chains and rules,
//! deploys them atomically and re-reads live state.

pub mod backend;
pub mod deploy;
pub mod drift;
pub mod handler;
pub mod mock;
pub mod model;
pub mod resync;

pub use backend::{EbtBackend, EbtCommand, Namespace, ShellEbtables};
pub use deploy::DeployReport;
pub use drift::{diff_rulesets, render_listing};
pub use handler::EbtHandler;
pub use mock::MockEbtables;
pub use model::{BUILTIN_CHAINS, Chain, PLACEHOLDER_CHAIN, Rule, RuleSet, Table};
pub use resync::load_listing;
