//! Shared plumbing for the lumen agent crates: typed identifiers, the HTTP
//! client wrapper, atomic file writes, the JSON document store and the
//! device restart facility.

pub mod crypto;
pub mod dirs;
pub mod fs;
pub mod http;
pub mod storage;
pub mod store;
pub mod system;
pub mod types;
