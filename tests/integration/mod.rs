//! Integration tests
//!
//! Whole-client flows against the loopback backend

mod offline_test;
mod persistence_test;
mod realtime_test;
mod session_test;
