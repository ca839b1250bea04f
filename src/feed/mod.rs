//! Turning vendor activity listings into feed documents.
//!
//! - [`activity`] - vendor activity shapes and their conversion to [`FeedItem`]
//! - [`atom`] - the [`FeedRenderer`] seam and its Atom 1.0 implementation

mod activity;
mod atom;

pub use activity::{Activity, ActivityObject, Actor, Attachment, FeedItem, Image, Person};
pub use atom::{atom_date, AtomRenderer, FeedMeta, FeedRenderer};
