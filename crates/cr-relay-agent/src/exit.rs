//! Process exit statuses.
//!
//! The binary runs one cycle per start. Everything that ends a cycle exits
//! cleanly so the container restart policy simply tries again; only a GCP
//! connection that could not be renewed is reported as a failure.

use crate::error::RelayError;
use crate::relay::{CycleOutcome, RelayExit};

pub const SUCCESS: u8 = 0;
pub const RENEWAL_EXHAUSTED: u8 = 1;

/// Status for a cycle that ended without relaying, `None` while relaying.
pub fn for_cycle(result: &Result<CycleOutcome, RelayError>) -> Option<u8> {
    match result {
        Ok(CycleOutcome::Relaying(_)) => None,
        Ok(CycleOutcome::Provisioning(_))
        | Ok(CycleOutcome::AwaitingCredentials)
        | Ok(CycleOutcome::LocalUnavailable) => Some(SUCCESS),
        Err(e) => Some(for_error(e)),
    }
}

/// Configuration, provisioning and connection errors all exit cleanly.
pub fn for_error(_: &RelayError) -> u8 {
    SUCCESS
}

pub fn for_relay(exit: &RelayExit) -> u8 {
    match exit {
        RelayExit::LocalClosed => SUCCESS,
        RelayExit::RenewalExhausted(_) => RENEWAL_EXHAUSTED,
    }
}
