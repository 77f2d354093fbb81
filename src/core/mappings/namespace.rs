use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::PipelineError;

/// The three naming layers of the game binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Names as shipped in the distributed jars.
    #[serde(alias = "official")]
    Obfuscated,
    /// Stable anchors that survive game updates.
    #[serde(alias = "intermediary")]
    Intermediate,
    /// Human-readable community names.
    Named,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [
        Namespace::Obfuscated,
        Namespace::Intermediate,
        Namespace::Named,
    ];

    pub fn index(self) -> usize {
        match self {
            Namespace::Obfuscated => 0,
            Namespace::Intermediate => 1,
            Namespace::Named => 2,
        }
    }

    /// Column name used by Tiny files.
    pub fn tiny_name(self) -> &'static str {
        match self {
            Namespace::Obfuscated => "official",
            Namespace::Intermediate => "intermediary",
            Namespace::Named => "named",
        }
    }

    /// Namespaces consulted, in order, when a name is missing in `self`.
    /// Named names are optional and fall back to intermediate ones; the
    /// intermediate layer has no fallback.
    pub fn fallback_chain(self) -> &'static [Namespace] {
        match self {
            Namespace::Obfuscated => &[Namespace::Obfuscated],
            Namespace::Intermediate => &[Namespace::Intermediate],
            Namespace::Named => &[Namespace::Named, Namespace::Intermediate],
        }
    }
}

impl FromStr for Namespace {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "official" | "obfuscated" | "obf" => Ok(Namespace::Obfuscated),
            "intermediary" | "intermediate" => Ok(Namespace::Intermediate),
            "named" => Ok(Namespace::Named),
            other => Err(PipelineError::Config(format!("unknown namespace '{other}'"))),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Namespace::Obfuscated => "obfuscated",
            Namespace::Intermediate => "intermediate",
            Namespace::Named => "named",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tiny_and_canonical_names() {
        assert_eq!("official".parse::<Namespace>().unwrap(), Namespace::Obfuscated);
        assert_eq!("intermediary".parse::<Namespace>().unwrap(), Namespace::Intermediate);
        assert_eq!("named".parse::<Namespace>().unwrap(), Namespace::Named);
        assert!("srg".parse::<Namespace>().is_err());
    }

    #[test]
    fn serde_accepts_aliases() {
        let ns: Namespace = serde_json::from_str("\"intermediary\"").unwrap();
        assert_eq!(ns, Namespace::Intermediate);
        assert_eq!(serde_json::to_string(&Namespace::Named).unwrap(), "\"named\"");
    }
}
