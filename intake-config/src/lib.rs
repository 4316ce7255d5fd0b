//! Layered configuration for intake sources.
//!
//! Options come from a TOML or JSON file, the `INTAKE_CONFIG_JSON` inline
//! document, `INTAKE__*` environment variables and command line overrides,
//! in increasing order of precedence. Everything is flattened into the
//! dotted key map that [`intake_core::SourceConfig`] validates.

#![allow(missing_docs)]

pub mod error;
pub mod flatten;
pub mod loader;

pub use error::ConfigLoadError;
pub use loader::{
    CONFIG_JSON_ENV, CONFIG_PATH_ENV, ConfigLoad, ConfigLoader, ConfigLoaderOptions, ConfigSource,
    ENV_PREFIX, parse_assignment,
};
