//! Vitrine-Common: Shared types, constants, and utilities.
//!
//! This crate provides common functionality used across vitrine:
//!
//! - **Core Types**: Enums for media types, channels, source kinds and states
//! - **Path Utilities**: Functions to classify media files by extension
//! - **Error Handling**: The error taxonomy shared by every component
//!
//! # Examples
//!
//! ```
//! use vitrine_common::{ChannelId, MediaType, Error, Result};
//! use vitrine_common::paths::detect_media_type;
//! use std::path::Path;
//!
//! assert_eq!(detect_media_type(Path::new("beach.JPG")), Some(MediaType::Image));
//! assert_eq!(ChannelId::Secondary.to_string(), "secondary");
//!
//! fn example() -> Result<()> {
//!     Err(Error::config("source name is required"))
//! }
//! assert!(example().is_err());
//! ```

pub mod error;
pub mod paths;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
