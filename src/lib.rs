//! Kiln: pipeline automation runtime.
//!
//! Pipelines are trees of actions built from typed expressions. Sessions fan
//! out over hosts, one connection per host. Any compiled pipeline can be
//! printed back as code.

pub mod cli;
pub mod core;
pub mod plugins;
pub mod transport;
