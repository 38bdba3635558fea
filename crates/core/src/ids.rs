// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier types.
//!
//! Every entity id is a fixed-format hex string minted server-side:
//! workspaces are `w` + 24 hex chars, sessions are 32 hex chars, worktrees
//! are the literal `main` or `w` + 12 hex chars, turns are `t` + 16 hex
//! chars. Message ids are store-assigned integers, monotone per worktree.

use rand::RngCore;

/// Store-assigned message id, unique and monotone within a worktree.
pub type MessageId = i64;

/// Mint `n` random bytes as a lowercase hex string of length `2n`.
fn hex_suffix(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Returns true when `s` is entirely lowercase hex of length `len`.
fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Define a string-newtype id wrapper with the shared impl surface.
///
/// Mint functions and format validation are written per type — the formats
/// are part of the external contract and differ between entities.
macro_rules! string_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// Tenant identifier: `w` followed by 24 hex chars.
    pub struct WorkspaceId;
}

impl WorkspaceId {
    pub fn mint() -> Self {
        Self(format!("w{}", hex_suffix(12)))
    }

    /// Validate the `w[0-9a-f]{24}` format.
    pub fn is_valid(s: &str) -> bool {
        matches!(s.strip_prefix('w'), Some(rest) if is_hex(rest, 24))
    }
}

string_id! {
    /// Session identifier: 32 hex chars.
    pub struct SessionId;
}

impl SessionId {
    pub fn mint() -> Self {
        Self(hex_suffix(16))
    }

    pub fn is_valid(s: &str) -> bool {
        is_hex(s, 32)
    }
}

string_id! {
    /// Worktree identifier: the primary clone is the literal `main`;
    /// additional worktrees are `w` followed by 12 hex chars.
    pub struct WorktreeId;
}

impl WorktreeId {
    pub const MAIN: &'static str = "main";

    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    pub fn mint() -> Self {
        Self(format!("w{}", hex_suffix(6)))
    }

    pub fn is_main(&self) -> bool {
        self.0 == Self::MAIN
    }

    pub fn is_valid(s: &str) -> bool {
        s == Self::MAIN || matches!(s.strip_prefix('w'), Some(rest) if is_hex(rest, 12))
    }

    /// Short suffix used when minting branch names.
    pub fn short(&self) -> &str {
        if self.is_main() {
            Self::MAIN
        } else {
            &self.0[..7.min(self.0.len())]
        }
    }
}

string_id! {
    /// Server-generated turn identifier: `t` followed by 16 hex chars.
    ///
    /// Independent of whatever id the provider CLI assigns internally.
    pub struct TurnId;
}

impl TurnId {
    pub fn mint() -> Self {
        Self(format!("t{}", hex_suffix(8)))
    }
}

#[cfg(test)]
#[path = "ids_tests.rs"]
mod tests;
