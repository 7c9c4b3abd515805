//! Core data model types for provider messages, attachment parts, and labels.

pub mod attachment;
pub mod label;
pub mod message;
