//! Project configuration for T-Ruby IDE integration.
//!
//! Only two values of `trbconfig.yml` matter to the IDE: where the compiler
//! writes Ruby output (`ruby_dir`) and, optionally, where it writes RBS
//! signatures (`rbs_dir`). Anything else in the file is ignored.

pub mod error;
pub mod source;

pub use error::{ConfigError, Result};
pub use source::{
    CONFIG_FILE_NAME, ConfigSource, DEFAULT_OUTPUT_DIR, OutputConfig, TrbConfigFile,
};
