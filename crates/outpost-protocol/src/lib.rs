//! Outpost Protocol - wire models for the flow executor API
//!
//! Challenges sent by the flow executor are polymorphic documents discriminated by their
//! `component` field. This crate decodes the small closed set the outpost understands into
//! [`models::Stage`] and keeps everything else as [`models::Stage::Unsupported`].

#![warn(missing_docs)]

/// Challenge, response and access-check models
pub mod models;

pub use models::*;
