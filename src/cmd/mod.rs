//! CLI command implementations.
//!
//! | Module   | Commands handled          |
//! |----------|---------------------------|
//! | `serve`  | `Serve` (also the default) |
//! | `config` | `Config`                  |

pub mod config;
pub mod serve;

pub use config::cmd_config;
pub use serve::cmd_serve;
