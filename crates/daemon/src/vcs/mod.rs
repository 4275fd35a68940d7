// Repository synchronization engine: directory cache, remote fetch, log
// parsing, commit matching, browser links.

pub mod browser;
pub mod directory;
pub mod error;
pub mod fetcher;
pub mod lock;
pub mod matcher;
pub mod orchestrator;
pub mod parser;
pub mod record;
