//! Plugins: actions that reach outside the process.
//!
//! Each plugin is an explicit handle passed to the actions that need it:
//! 1. `ssh` dials hosts and runs remote commands and copies
//! 2. `builder` pushes container images through a build backend

pub mod builder;
pub mod ssh;
