//! tlsmux - TLS and plaintext HTTP on a single port
//!
//! This crate sniffs the first bytes of every accepted connection and either
//! terminates a TLS session or passes the bytes through untouched, handing the
//! result to an HTTP engine as one uniform `Connection`.

pub mod mux;
