//! Layered configuration for the resilience core.
//!
//! Later layers win:
//! 1. Built-in defaults
//! 2. A TOML file (`./solebox.toml`, `<config dir>/solebox/config.toml`, `~/.solebox.toml`)
//! 3. `SOLEBOX_*` environment variables, `__` separating nested keys
//!    (`SOLEBOX_CIRCUIT_BREAKERS__STOCKX__TIMEOUT_MS=60000`)
//!
//! ```no_run
//! use solebox_resilience::config::ConfigLoader;
//!
//! let config = ConfigLoader::load_default()?;
//! let stockx = config.breaker_for("stockx");
//! # Ok::<(), solebox_resilience::config::ConfigError>(())
//! ```

pub mod error;
pub mod loader;
pub mod validator;

pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, Environment, ResilienceConfig};
pub use validator::validate;
