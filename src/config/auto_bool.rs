//! Three-valued `auto | true | false` settings.
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// A flag that is on, off, or decided at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "Raw")]
pub enum AutoBool {
    /// Decide from the environment.
    #[default]
    Auto,
    /// Always on.
    True,
    /// Always off.
    False,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Bool(bool),
    Str(String),
}

impl TryFrom<Raw> for AutoBool {
    type Error = String;

    fn try_from(raw: Raw) -> Result<Self, Self::Error> {
        match raw {
            Raw::Bool(true) => Ok(Self::True),
            Raw::Bool(false) => Ok(Self::False),
            Raw::Str(s) => s.parse(),
        }
    }
}

impl FromStr for AutoBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "1" | "on" | "y" | "yes" | "t" | "true" => Ok(Self::True),
            "0" | "off" | "n" | "no" | "f" | "false" => Ok(Self::False),
            other => Err(format!("invalid value '{other}', expected auto, true or false")),
        }
    }
}

impl fmt::Display for AutoBool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::True => "true",
            Self::False => "false",
        })
    }
}

impl AutoBool {
    /// Resolve to a concrete value, using `auto` for [`AutoBool::Auto`].
    #[must_use]
    pub const fn resolve(self, auto: bool) -> bool {
        match self {
            Self::Auto => auto,
            Self::True => true,
            Self::False => false,
        }
    }
}
