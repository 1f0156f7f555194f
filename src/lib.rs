//! vitrine - always-on media presentation
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod player;
pub mod playlist;
pub mod secrets;
pub mod service;
pub mod sources;
pub mod state;
pub mod tool;

pub use service::{Slideshow, SlideshowBuilder};
