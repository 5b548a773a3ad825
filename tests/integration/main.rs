//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against mock ports. All tests run on the host (x86_64) with no radio
//! or flash required.

mod bonding_tests;
mod dispatcher_tests;
mod ota_flow_tests;
