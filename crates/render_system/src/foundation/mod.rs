//! Foundation module - Core utilities and types
//!
//! This module provides the small utilities the render system is built on:
//! - Math types for view matrices and sort depths
//! - Bounds-checked node arrays addressed by node references
//! - Phase timing
//! - Logging utilities

pub mod math;
pub mod collections;
pub mod time;
pub mod logging;
