//! Utility functions shared across the codebase

pub mod math;

// Re-export commonly used utilities
pub use math::{mean, population_variance};
