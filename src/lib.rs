//! Measurement core for mutation testing.
//!
//! - [`trace`]: recorded execution traces, their store, the baseline cache
//!   and the differencing engine that decides which units a mutation changed
//! - [`stability`]: randomized repeated runs that tell order-dependent or
//!   flaky tests apart from stable ones
//! - [`manifest`]: shell-command test collections for the CLI
//! - [`config`]: user configuration

pub mod config;
pub mod manifest;
pub mod stability;
pub mod trace;
