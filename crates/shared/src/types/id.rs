//! Typed IDs for type-safe entity references.
//!
//! Catalog ids are store-assigned integers. Wrapping them prevents passing an
//! `EmailId` where a `UserId` is expected when removing attachments by owner.

use serde::{Deserialize, Serialize};

/// Macro to generate typed ID wrappers.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Wraps a raw catalog id.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the raw catalog id.
            #[must_use]
            pub const fn into_inner(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

typed_id!(AttachmentId, "Catalog identifier of an attachment row.");
typed_id!(UserId, "Unique identifier for a mailbox user.");
typed_id!(AccountId, "Unique identifier for a mail account.");
typed_id!(EmailId, "Unique identifier for an email.");

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
