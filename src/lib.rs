//! Tether: certificate-authenticated remote access daemon.
//!
//! Peers authenticate with a TLS client certificate. The certificate's common
//! name selects an ACL entry which grants file read, file write, allow-listed
//! command execution, or shell execution, each confined to a root directory.
//!
//! See `DESIGN.md` for full architecture documentation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod acl;
pub mod authorizer;
pub mod config;
pub mod identity;
pub mod logging;
pub mod sandbox;

pub mod executor;
pub mod server;
