//! `closet-core`: shared identifiers and the domain error model.
//!
//! Pure types only; no storage or transport concerns live here.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{ItemId, JobId, UserId};
