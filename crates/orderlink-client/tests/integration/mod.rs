//! Integration tests for orderlink-client.
//!
//! These tests run the channel and the sync client against an in-process
//! WebSocket server speaking the order notification protocol.

pub mod common;
