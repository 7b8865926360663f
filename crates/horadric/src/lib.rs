//! Horadric - Blizzard MPQ archive reading library.
//!
//! This crate provides a unified interface to the Horadric crates.
//!
//! # Crates
//!
//! - [`horadric_common`] - Common utilities (binary reading, single-flight cells)
//! - [`horadric_mpq`] - MPQ archive reading (hash tables, sectors, implode/zlib)
//!
//! # Example
//!
//! ```no_run
//! use horadric::prelude::*;
//!
//! let archive = MpqArchive::open("war3.mpq")?;
//!
//! if let Some(entry) = archive.find("war3map.j")? {
//!     println!("{}: {} bytes", entry.display_name(), entry.uncompressed_size);
//!     let data = archive.extract(&entry.name)?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Re-export all sub-crates
pub use horadric_common as common;
pub use horadric_mpq as mpq;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use horadric_common::{BinaryReader, SingleFlight};
    pub use horadric_mpq::{
        BlockFlags, ByteSource, ErrorKind, MpqArchive, MpqEntry, OpenOptions, SectorCodec,
    };
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
