//! Path utilities for classifying media files by extension.
//!
//! Scans use these to decide which files enter a source's catalog. Anything
//! that is neither an image nor a video is skipped.

use std::path::Path;

use crate::MediaType;

/// List of supported image file extensions.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// List of supported video file extensions.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm", "m4v"];

/// Housekeeping files that show up on shares and are never media.
const IGNORED_EXTENSIONS: &[&str] = &["db", "ini", "tmp", "ds_store"];

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Check if a path has an image file extension.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use vitrine_common::paths::is_image_file;
///
/// assert!(is_image_file(Path::new("holiday.jpg")));
/// assert!(is_image_file(Path::new("/srv/media/poster.PNG")));
/// assert!(!is_image_file(Path::new("clip.mp4")));
/// ```
pub fn is_image_file(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Check if a path has a video file extension.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use vitrine_common::paths::is_video_file;
///
/// assert!(is_video_file(Path::new("loop.webm")));
/// assert!(!is_video_file(Path::new("holiday.jpg")));
/// ```
pub fn is_video_file(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Check if a path is a known housekeeping file (`Thumbs.db`, `desktop.ini`, ...).
pub fn is_ignored_file(path: &Path) -> bool {
    if path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.eq_ignore_ascii_case(".ds_store"))
        .unwrap_or(false)
    {
        return true;
    }
    extension_of(path)
        .map(|ext| IGNORED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Classify a file as image or video, or `None` when it is not playable media.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use vitrine_common::{paths::detect_media_type, MediaType};
///
/// assert_eq!(detect_media_type(Path::new("a.mkv")), Some(MediaType::Video));
/// assert_eq!(detect_media_type(Path::new("Thumbs.db")), None);
/// ```
pub fn detect_media_type(path: &Path) -> Option<MediaType> {
    if is_ignored_file(path) {
        None
    } else if is_image_file(path) {
        Some(MediaType::Image)
    } else if is_video_file(path) {
        Some(MediaType::Video)
    } else {
        None
    }
}

/// Get the list of image file extensions.
pub fn image_extensions() -> &'static [&'static str] {
    IMAGE_EXTENSIONS
}

/// Get the list of video file extensions.
pub fn video_extensions() -> &'static [&'static str] {
    VIDEO_EXTENSIONS
}
