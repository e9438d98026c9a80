//! Hardware drivers behind the platform contracts.

pub mod adpd410x;
