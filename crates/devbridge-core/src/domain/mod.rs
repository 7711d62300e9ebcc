//! Domain entities for the device bridge.
//!
//! Everything in this module is plain data plus the pure rules that govern it
//! (default working directories, quality tiers, filter matching, ring-buffer
//! eviction).  Nothing here performs I/O or awaits.

pub mod capture;
pub mod log;
pub mod session;
pub mod terminal;
