//! Common types shared across Conclave components.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;
