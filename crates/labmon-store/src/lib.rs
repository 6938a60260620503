pub mod file;
pub mod import;
pub mod memory;
pub mod types;

pub use file::FileConfigStore;
pub use import::{export_config_list, parse_config_list};
pub use memory::MemoryConfigStore;
pub use types::{ConfigEvent, ConfigStore, ConfigWatchStream};
