//! End-to-end tests for the Keyward holder
//!
//! This test suite validates:
//! - Pairing from a scanned payload to a watched device
//! - Freshness, verification and duplicate handling of relayed challenges
//! - Presence-gated signing, cancellation and expiry of challenges

pub mod test_utils;

#[cfg(test)]
mod challenge_flow_tests;

#[cfg(test)]
mod pairing_flow_tests;
