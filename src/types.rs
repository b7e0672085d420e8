//! Core types for the user store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a user record.
///
/// Ids are minted by the store from a monotonically increasing counter and
/// are never reused, even after the record is deleted.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl UserId {
    /// The id after this one.
    pub fn next(self) -> Self {
        UserId(self.0 + 1)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(UserId)
    }
}

/// A single user record.
///
/// The same shape doubles as a draft (for `create`) and as a patch (for
/// `update`). In a patch, an empty `name` or a zero `age` means "leave the
/// stored value alone"; there is no way to clear a name or set the age to
/// zero through an update.
///
/// Field names on the wire are fixed (`ID`, `Name`, `Age`) so that files
/// written by one version load in the next. Lowercase spellings are
/// accepted when reading.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Assigned by the store; ignored in drafts and patches.
    #[serde(rename = "ID", alias = "id", default)]
    pub id: UserId,

    #[serde(rename = "Name", alias = "name", default)]
    pub name: String,

    #[serde(rename = "Age", alias = "age", default)]
    pub age: u32,
}

impl User {
    /// Build a draft record. The id is left unset.
    pub fn draft(name: impl Into<String>, age: u32) -> Self {
        Self {
            id: UserId::default(),
            name: name.into(),
            age,
        }
    }

    /// Patch that only changes the name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Patch that only changes the age.
    pub fn with_age(age: u32) -> Self {
        Self {
            age,
            ..Default::default()
        }
    }

    /// Merge a patch into this record, field by field.
    ///
    /// A field is taken from the patch only when it holds a non-zero value.
    /// The id never changes.
    pub fn merge(&mut self, patch: &User) {
        if !patch.name.is_empty() {
            self.name.clone_from(&patch.name);
        }
        if patch.age > 0 {
            self.age = patch.age;
        }
    }
}
