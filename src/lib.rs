//! `mailharvest`: download mail attachments into a year/month folder tree,
//! exactly once.
//!
//! This crate provides the ledger, path planning, staging/relocation and the
//! pipeline that ties them to a mail provider [`fetch::Fetcher`].

pub mod config;
pub mod error;
pub mod fetch;
pub mod ledger;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod planner;
pub mod stage;
