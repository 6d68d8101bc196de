//! Core data models for the blob store.
//!
//! `file` holds the stored record and its read-side projection, `image`
//! the format tags understood by the image processor and `access` the
//! permissions resolved for a request.

pub mod access;
pub mod file;
pub mod image;
