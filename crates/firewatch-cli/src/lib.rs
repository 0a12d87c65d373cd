//! Firewatch job wiring.
//!
//! - `config`: environment parsing into an explicit `RuntimeConfig`.
//! - `github_api`: authenticated GitHub REST client, retry, and pagination.
//! - `issue_source`: open-issue search with reaction totals.
//! - `artifact_store`: previous snapshot download and current snapshot publish.
//! - `slack`: alert message formatting and delivery.
//! - `run`: one sequential fetch, search, diff, publish, notify pass.

pub mod artifact_store;
pub mod config;
pub mod github_api;
pub mod issue_source;
pub mod run;
pub mod slack;
