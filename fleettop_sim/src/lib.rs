//! Synthetic fleet backend: serves the monitor REST surface and the live
//! metrics feed from seeded, drifting data. Used by `fleettop --demo` and by
//! integration tests that need a real HTTP peer.

pub mod cli;
pub mod fleet;
pub mod routes;
pub mod sampler;
pub mod state;
