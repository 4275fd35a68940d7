// revline-daemon library entry point.

pub mod config;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod vcs;
