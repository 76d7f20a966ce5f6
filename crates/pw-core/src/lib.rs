pub mod config;
pub mod desired;
pub mod diff;
pub mod error;
pub mod exec;
pub mod status;
pub mod workfile;

pub use config::*;
pub use desired::*;
pub use diff::line_diff;
pub use error::{Error, Result, require, try_push};
pub use exec::{CommandPrefix, CommandStatus};
pub use status::*;
pub use workfile::WorkFile;
