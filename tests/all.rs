//! Integration test aggregator
//!
//! Individual test modules are declared in `suite/mod.rs`. The suite drives
//! `/bin/sh` fake subprocesses, so it only builds on unix.

#![cfg(unix)]

mod common;
mod suite;
