//! Utility types and functions for the verifier.
//!
//! This module provides:
//! - Block hashing with the configured algorithm and salt
//! - An atomic bitmap for per-block verification state

pub mod bitmap;
pub mod hasher;
