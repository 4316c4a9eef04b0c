//! Shared searchsync model types.
//!
//! Pure data types used by the checkpoint stores and the ETL engine. Kept in
//! their own crate so the state and engine crates can share them without
//! circular dependencies.

#![warn(clippy::pedantic)]

pub mod document;
pub mod entity;
pub mod row;
pub mod watermark;
