pub mod mock;
pub mod sysfs;

pub use mock::{MockSysfsBackend, WriteRecord};
pub use sysfs::SysfsBackend;
