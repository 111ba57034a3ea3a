//! Identifiers shared across the link crate.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identity of one execution context (dispatch queue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(Ulid);

impl ContextId {
    /// Create a new random context ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session-local link handle. Handles are allocated in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkHandle(u32);

impl LinkHandle {
    /// Create a handle from its wire value.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Wire value.
    pub const fn value(self) -> u32 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl std::fmt::Display for LinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-link delivery tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeliveryTag(u64);

impl DeliveryTag {
    /// Create a tag from its wire value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Wire value.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The tag following this one.
    pub(crate) const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle a store gateway returns for a created record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordHandle(u64);

impl RecordHandle {
    /// Create a handle from a store-assigned value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Store-assigned value.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RecordHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "record-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_generate_distinct_context_ids() {
        assert_ne!(ContextId::new(), ContextId::new());
    }

    #[test]
    fn should_advance_delivery_tags() {
        let tag = DeliveryTag::new(41);
        assert_eq!(tag.next().value(), 42);
        assert_eq!(DeliveryTag::new(u64::MAX).next().value(), 0);
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(LinkHandle::new(3).to_string(), "3");
        assert_eq!(RecordHandle::new(9).to_string(), "record-9");
    }
}
