// revline-common: shared types and issue-key rules for the Revline workspace

pub mod issuekey;
pub mod revision;
pub mod types;
