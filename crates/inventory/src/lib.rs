//! Closet inventory records.
//!
//! Plain domain data (no IO, no HTTP, no storage): an item a reseller owns
//! and the partial update an applied AI result makes to it.

pub mod item;

pub use item::{ClosetItem, ItemPatch, NewItem};
