//! Unit tests for rust-sproc-analyzer
//!
//! This file serves as the entry point for all unit tests.

#[path = "common/mod.rs"]
mod common;

#[path = "unit/scenario_tests.rs"]
mod scenario_tests;

#[path = "unit/property_tests.rs"]
mod property_tests;
