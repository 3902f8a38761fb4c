//! # Capability Descriptors
//!
//! A client-local description of a remote class: which member names are
//! methods and which are properties. The proxy consults it to decide whether an
//! attribute read issues a call now or hands back a callable. Descriptors are
//! never sent over the wire.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Method,
    Property,
}

/// The member table of one remote class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    class_name: String,
    members: HashMap<String, MemberKind>,
}

impl Shape {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self { class_name: class_name.into(), members: HashMap::new() }
    }

    pub fn method(mut self, name: impl Into<String>) -> Self {
        self.members.insert(name.into(), MemberKind::Method);
        self
    }

    pub fn property(mut self, name: impl Into<String>) -> Self {
        self.members.insert(name.into(), MemberKind::Property);
        self
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn kind(&self, name: &str) -> Option<MemberKind> {
        self.members.get(name).copied()
    }

    /// Member names, sorted.
    pub fn members(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.members.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
