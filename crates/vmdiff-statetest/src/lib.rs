//! # vmdiff-statetest
//!
//! GeneralStateTest files as consumed by the EVM binaries under test.
//!
//! This crate provides:
//! - Serde types for the state test json format (hex or decimal quantities)
//! - Storing generated tests under a stable naming scheme
//! - Loading tests and discovering them in directory trees

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod store;
mod types;

pub use error::{StateTestError, StateTestResult};
pub use store::{find_tests, load_test, store_test, test_file_name};
pub use types::*;
