//! # parley-client
//!
//! Async client for the parley messaging protocol.
//!
//! This crate provides:
//! - A TCP connection with sequence numbering and reply correlation
//! - Outbound queueing while the connection is being established
//! - Spontaneous (server-pushed) packets via a broadcast channel
//! - Typed helpers for login, entity fetches, contacts and search
//! - Optional TLS support and YAML/env configuration

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod sequencer;
pub mod stream;
pub mod tls;

pub use client::{Client, LoginOutcome};
pub use config::{ClientConfig, ConfigError};
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
pub use sequencer::{ConnectionStatus, Sequencer};
pub use tls::TlsClientConfig;
