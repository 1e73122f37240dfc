//! River command-line interface and HTTP transport
//!
//! The binary is `river`. The library half exposes the HTTP app and the demo
//! stream routes so they can be mounted and tested in-process.

pub mod logging;
pub mod server;
pub mod streams;
