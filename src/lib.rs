//! prefork - a pre-forked static file server.
//!
//! One dispatcher process accepts connections and passes each one to a pool
//! of worker processes over a UNIX socket pair. Every worker answers one
//! HTTP/1.x request per connection with a file from the document root.

pub mod config;
pub mod fsm;
pub mod http;
pub mod ipc;
pub mod server;
