//! Room identifiers.
//!
//! A room is nothing more than a string key. It has no registry of its own:
//! it exists as long as at least one connection is subscribed to it.

use std::borrow::Borrow;
use std::sync::Arc;

/// Maximum length of a room identifier, in bytes.
pub const MAX_ROOM_LEN: usize = 256;

/// A validated room identifier.
///
/// Cloning is cheap; the name is shared between every connection that
/// references the room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Room(Arc<str>);

impl Room {
    /// Parses a room identifier.
    ///
    /// Returns None if the name is blank, longer than [`MAX_ROOM_LEN`] bytes,
    /// or contains control characters. Surrounding whitespace is kept: rooms
    /// are matched byte for byte.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        if name.trim().is_empty() || name.len() > MAX_ROOM_LEN {
            return None;
        }

        if name.chars().any(char::is_control) {
            return None;
        }

        Some(Self(Arc::from(name)))
    }

    /// Returns the room name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the room name starts with the given prefix.
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl Borrow<str> for Room {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
