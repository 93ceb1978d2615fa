//! End-to-end tests for portable-updater.
//!
//! Each test builds a synthetic installation under a temp directory and runs
//! the real checker and applier against it. Network access goes through an
//! in-memory [`harness::MemorySource`], except in `http` which serves the
//! manifest and package from a loopback listener.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod apply;
mod check;
mod harness;
mod http;
