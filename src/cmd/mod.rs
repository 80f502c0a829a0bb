//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled              |
//! |-----------|-------------------------------|
//! | `serve`   | `Serve`                       |
//! | `inspect` | `Projects`, `Status`, `Logs`  |
//! | `config`  | `Config`                      |

pub mod config;
pub mod inspect;
pub mod serve;

pub use config::cmd_config;
pub use inspect::{cmd_logs, cmd_projects, cmd_status};
pub use serve::cmd_serve;
