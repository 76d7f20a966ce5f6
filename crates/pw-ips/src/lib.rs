//! Address-set handler: models ipset sets of IPv4 networks, deploys them
//! through `ipset restore` and re-reads live state from `ipset save`.

pub mod backend;
pub mod deploy;
pub mod drift;
pub mod handler;
pub mod mock;
pub mod model;
pub mod resync;

pub use backend::{IpsCommand, IpsetBackend, ShellIpset};
pub use deploy::render_restore;
pub use drift::{diff_setbases, render_save};
pub use handler::IpsHandler;
pub use mock::MockIpset;
pub use model::{HOST_PREFIX, IpSet, SetBase, parse_network};
pub use resync::load_save;
