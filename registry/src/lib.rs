pub mod discovery;
pub mod entry;
pub mod filter;
pub mod list;

pub use discovery::{
    discover, discover_all, discover_into, runner_path, DiscoveryError, DiscoveryResult,
    PTEST_SUBDIR, RUNNER_NAME,
};
pub use entry::{FileIdentity, TestEntry};
pub use filter::filter;
pub use list::{Iter, Registry, RegistryError, RegistryResult};

pub mod prelude {
    pub use crate::discovery::*;
    pub use crate::entry::*;
    pub use crate::filter::*;
    pub use crate::list::*;
}
