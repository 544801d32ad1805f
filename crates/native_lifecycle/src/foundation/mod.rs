//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the crate:
//! - Versioned keys and collections for the record table
//! - Logging utilities

pub mod collections;
pub mod logging;
