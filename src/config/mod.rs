//! # Configuration
//!
//! Operator settings from the environment.

pub mod operator;

pub use operator::OperatorConfig;
