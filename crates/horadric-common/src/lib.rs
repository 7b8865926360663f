//! Common utilities for Horadric.
//!
//! This crate provides the building blocks shared by the Horadric crates:
//!
//! - [`BinaryReader`] - Bounds-checked little-endian reading from byte slices
//! - [`SingleFlight`] - Lazily computed, coalesced and cached values

mod error;
mod flight;
mod reader;

pub use error::{Error, Result};
pub use flight::SingleFlight;
pub use reader::BinaryReader;
