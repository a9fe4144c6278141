//! TCP transport: accept loop for SSTP over HTTP-upgraded connections.

pub mod server;

pub use server::SstpServer;
