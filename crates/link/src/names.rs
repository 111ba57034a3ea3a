//! Link name generation.

use ulid::Ulid;

/// Source of link names for links created without one.
pub trait NameGenerator: Send {
    fn next_name(&mut self) -> String;
}

/// Random, globally unique names.
#[derive(Debug, Clone, Copy, Default)]
pub struct UlidNameGenerator;

impl NameGenerator for UlidNameGenerator {
    fn next_name(&mut self) -> String {
        Ulid::new().to_string().to_lowercase()
    }
}

/// Deterministic `prefix-N` names.
#[derive(Debug, Clone)]
pub struct SequentialNameGenerator {
    prefix: String,
    next: u64,
}

impl SequentialNameGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 0,
        }
    }
}

impl NameGenerator for SequentialNameGenerator {
    fn next_name(&mut self) -> String {
        let name = format!("{}-{}", self.prefix, self.next);
        self.next = self.next.wrapping_add(1);
        name
    }
}
