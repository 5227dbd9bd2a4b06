//! # System Interaction Layer
//!
//! The boundary between the core logic and the operating system.
//!
//! ## Modules
//!
//! - **`executor`**: spawns external processes (external verbs, the `sqlcmd`
//!   client, report publishers, detached daemons) and captures their output.
//! - **`host`**: finds the name of the host the configuration is loaded for.

pub mod executor;
pub mod host;
