//! Test suite for SponsorLink
//!
//! This module organizes all tests

#[macro_use]
pub mod common;
pub mod integration;
