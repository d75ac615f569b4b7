//! Utilities for bridging tokio I/O to `hyper`.

pub mod io;
