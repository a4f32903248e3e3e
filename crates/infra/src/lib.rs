//! Infrastructure layer: configuration, the AI job ledger and its stores,
//! the background worker and the model client.

pub mod config;
pub mod external;
pub mod jobs;
pub mod ledger;
