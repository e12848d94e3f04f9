//! Cascade - a permission-aware cascading delete engine.
//!
//! This crate decides *what* to delete from a multi-tenant hierarchical
//! object store, *in what order*, and *whether the requester is allowed to*.
//! The store itself stays external and is reached through the
//! [`storage::GraphStore`] trait; an in-memory backend is bundled.

#![forbid(unsafe_code)]

// Data model and errors
pub mod domain;
pub mod error;

// Collaborator interfaces
pub mod permissions;
pub mod storage;

// Delete pipeline
pub mod authorization;
pub mod engine;
pub mod report;
pub mod resolver;

pub mod config;

pub use engine::{CancelToken, DeleteEngine};
pub use error::{Error, Result};
