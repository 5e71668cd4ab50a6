use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

use serde::Serialize;

/// SQL truth value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trilean {
    /// `TRUE`
    True,
    /// `FALSE`
    False,
    /// `UNKNOWN` (the truth value of NULL)
    Unknown,
}

impl Trilean {
    /// Only `True` passes a filter.
    pub fn is_true(self) -> bool {
        self == Trilean::True
    }

    /// Kleene AND over an iterator; `True` when empty.
    pub fn all(values: impl IntoIterator<Item = Trilean>) -> Trilean {
        values.into_iter().fold(Trilean::True, |acc, v| acc & v)
    }

    /// Kleene OR over an iterator; `False` when empty.
    pub fn any(values: impl IntoIterator<Item = Trilean>) -> Trilean {
        values.into_iter().fold(Trilean::False, |acc, v| acc | v)
    }
}

impl From<bool> for Trilean {
    fn from(value: bool) -> Self {
        if value {
            Trilean::True
        } else {
            Trilean::False
        }
    }
}

impl Not for Trilean {
    type Output = Trilean;

    fn not(self) -> Trilean {
        match self {
            Trilean::True => Trilean::False,
            Trilean::False => Trilean::True,
            Trilean::Unknown => Trilean::Unknown,
        }
    }
}

impl BitAnd for Trilean {
    type Output = Trilean;

    fn bitand(self, rhs: Trilean) -> Trilean {
        match (self, rhs) {
            (Trilean::False, _) | (_, Trilean::False) => Trilean::False,
            (Trilean::True, Trilean::True) => Trilean::True,
            _ => Trilean::Unknown,
        }
    }
}

impl BitOr for Trilean {
    type Output = Trilean;

    fn bitor(self, rhs: Trilean) -> Trilean {
        match (self, rhs) {
            (Trilean::True, _) | (_, Trilean::True) => Trilean::True,
            (Trilean::False, Trilean::False) => Trilean::False,
            _ => Trilean::Unknown,
        }
    }
}

impl fmt::Display for Trilean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trilean::True => f.write_str("TRUE"),
            Trilean::False => f.write_str("FALSE"),
            Trilean::Unknown => f.write_str("UNKNOWN"),
        }
    }
}
