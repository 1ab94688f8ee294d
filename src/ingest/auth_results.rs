use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::graph::models::RawMessage;

pub const AUTHENTICATION_RESULTS_HEADER: &str = "Authentication-Results";

/// Result of a single mechanism (`spf=`, `dkim=`, `dmarc=`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum MechanismResult {
    Pass,
    Fail,
    None,
    #[default]
    NotFound,
    /// Anything else reported by the receiving server (softfail, neutral,
    /// temperror, ...).
    Other(String),
}

impl MechanismResult {
    fn is_present(&self) -> bool {
        !matches!(self, Self::NotFound)
    }

    fn is_acceptable(&self) -> bool {
        matches!(self, Self::Pass | Self::None)
    }
}

impl Display for MechanismResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::None => write!(f, "none"),
            Self::NotFound => write!(f, "not_found"),
            Self::Other(raw) => write!(f, "{raw}"),
        }
    }
}

impl From<&str> for MechanismResult {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pass" => Self::Pass,
            "fail" => Self::Fail,
            "none" => Self::None,
            "" | "not_found" => Self::NotFound,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for MechanismResult {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<MechanismResult> for String {
    fn from(result: MechanismResult) -> Self {
        result.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallVerdict {
    Pass,
    Fail,
    Partial,
    #[default]
    Unknown,
}

impl Display for OverallVerdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::Partial => write!(f, "partial"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for OverallVerdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pass" => Ok(Self::Pass),
            "fail" => Ok(Self::Fail),
            "partial" => Ok(Self::Partial),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("invalid authentication verdict: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthenticationVerdict {
    pub spf: MechanismResult,
    pub dkim: MechanismResult,
    pub dmarc: MechanismResult,
    pub overall: OverallVerdict,
}

impl AuthenticationVerdict {
    pub fn from_message(message: &RawMessage) -> Self {
        Self::from_headers(message.headers_named(AUTHENTICATION_RESULTS_HEADER))
    }

    /// Later headers override earlier ones per mechanism. With no header at
    /// all the overall verdict is `unknown`.
    pub fn from_headers<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut verdict = Self::default();
        let mut seen_header = false;

        for value in values {
            seen_header = true;
            let lowered = value.to_lowercase();
            if let Some(result) = mechanism(&lowered, "spf") {
                verdict.spf = result;
            }
            if let Some(result) = mechanism(&lowered, "dkim") {
                verdict.dkim = result;
            }
            if let Some(result) = mechanism(&lowered, "dmarc") {
                verdict.dmarc = result;
            }
        }

        verdict.overall = if seen_header {
            verdict.combine()
        } else {
            OverallVerdict::Unknown
        };
        verdict
    }

    fn combine(&self) -> OverallVerdict {
        let results = [&self.spf, &self.dkim, &self.dmarc];
        if results.iter().any(|result| **result == MechanismResult::Fail) {
            return OverallVerdict::Fail;
        }
        if results
            .iter()
            .filter(|result| result.is_present())
            .all(|result| result.is_acceptable())
        {
            return OverallVerdict::Pass;
        }
        OverallVerdict::Partial
    }

    pub fn is_failed(&self) -> bool {
        self.overall == OverallVerdict::Fail
    }

    /// Lenient decode of a stored verdict.
    pub fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

fn mechanism_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:^|[\s;])(spf|dkim|dmarc)\s*=\s*([a-z]+)").expect("compile auth results regex")
    })
}

fn mechanism(lowered: &str, name: &str) -> Option<MechanismResult> {
    mechanism_pattern()
        .captures_iter(lowered)
        .find(|caps| &caps[1] == name)
        .map(|caps| MechanismResult::from(&caps[2]))
}
