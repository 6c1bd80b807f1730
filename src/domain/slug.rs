//! Identifier helpers for configured links.
//!
//! Link ids are derived from the display name by lowercasing it and
//! collapsing every whitespace run into a single `-`. Punctuation is kept
//! as-is so ids stay stable for names that were published before. File names
//! derived from ids go through the `slug` crate so they are always safe to
//! place on disk.

use slug::slugify;
use thiserror::Error;

/// Errors that can occur while deriving an identifier.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug source text is empty")]
    EmptyInput,
    #[error("failed to derive slug from `{input}`")]
    Unrepresentable { input: String },
}

/// Derive a link id from a human-readable name.
pub fn derive_link_id(name: &str) -> Result<String, SlugError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SlugError::EmptyInput);
    }

    let id = trimmed
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-");

    Ok(id)
}

/// Derive a filesystem-safe stem (ASCII, hyphenated) from an arbitrary id.
pub fn file_stem_for(id: &str) -> Result<String, SlugError> {
    if id.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }

    let candidate = slugify(id);
    if candidate.is_empty() {
        return Err(SlugError::Unrepresentable {
            input: id.to_string(),
        });
    }

    Ok(candidate)
}
