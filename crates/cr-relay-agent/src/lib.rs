//! Cloud relay agent: library crate for the edge relay binary.
//!
//! Re-exports all modules so external crates (e.g. `cr-e2e-tests`) can
//! drive a relay cycle with mock connectors and a mock provisioning API.

pub mod config;
pub mod error;
pub mod exit;
pub mod local_link;
pub mod messenger;
pub mod provision;
pub mod relay;
pub mod retry;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;
