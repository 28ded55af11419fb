// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Null-propagation policy selected once per execution

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a null in a non-nullable position affects the rest of the response
///
/// - `Propagate`: the null bubbles to the nearest nullable ancestor
/// - `Null`: the null stays at the field, enclosing data is preserved
/// - `Halt`: the first error nulls the whole `data` and stops resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorBehavior {
    #[default]
    Propagate,
    Null,
    Halt,
}

impl ErrorBehavior {
    /// Parse a behavior name, ignoring case and surrounding whitespace
    ///
    /// Returns `(Propagate, false)` for anything unrecognized so callers can
    /// tell an explicit choice from a fallback.
    pub fn parse(value: &str) -> (ErrorBehavior, bool) {
        match value.trim().to_ascii_uppercase().as_str() {
            "PROPAGATE" => (ErrorBehavior::Propagate, true),
            "NULL" => (ErrorBehavior::Null, true),
            "HALT" => (ErrorBehavior::Halt, true),
            _ => (ErrorBehavior::Propagate, false),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorBehavior::Propagate => "PROPAGATE",
            ErrorBehavior::Null => "NULL",
            ErrorBehavior::Halt => "HALT",
        }
    }
}

impl fmt::Display for ErrorBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
