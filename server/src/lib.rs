//! LiveMark server - HTTP surface over the live-update core.
//!
//! This crate exposes [`livemark_core`] to viewers and external tools:
//! - A server-sent-events change stream with `Last-Event-ID` replay
//! - Side-channel ingestion of "who touched this file" records
//! - Whitelist listing, navigation, document opening and raw serving
//! - The `notify` hook client that posts records to a running server
//!
//! The server binds to loopback only and renders nothing: documents are
//! served as stored, and only if they are in the whitelist.

pub mod config;
pub mod error;
pub mod notifier;
pub mod routes;
