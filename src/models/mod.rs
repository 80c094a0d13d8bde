//! Core data models for the file store.
//!
//! `StoredObject` is what every gateway hands back; `ObjectRecord` is the
//! SQLite row behind the bucket backend; `view` holds the display-ready
//! shapes produced by the listing presenter.

pub mod object_record;
pub mod stored_object;
pub mod view;
