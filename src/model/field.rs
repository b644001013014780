//! Metadata field keys (`schema.element[.qualifier]`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// A metadata field such as `dc.contributor.author`.
///
/// Serialised in its dotted form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldKey {
    pub schema: String,
    pub element: String,
    pub qualifier: Option<String>,
}

impl FieldKey {
    pub fn new(schema: &str, element: &str, qualifier: Option<&str>) -> Self {
        Self {
            schema: schema.to_string(),
            element: element.to_string(),
            qualifier: qualifier.map(str::to_string),
        }
    }

    /// Parse a dotted key, panicking on malformed input. Only for literals in
    /// tests and static configuration; callers parse input with `str::parse`.
    #[doc(hidden)]
    pub fn of(dotted: &str) -> Self {
        match dotted.parse() {
            Ok(key) => key,
            Err(e) => panic!("invalid field key literal {dotted:?}: {e}"),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}.{}.{}", self.schema, self.element, q),
            None => write!(f, "{}.{}", self.schema, self.element),
        }
    }
}

impl FromStr for FieldKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::InvalidInput(format!("empty segment in field key {s:?}")));
        }
        match parts.as_slice() {
            [schema, element] => Ok(Self::new(schema, element, None)),
            [schema, element, qualifier] => Ok(Self::new(schema, element, Some(qualifier))),
            _ => Err(Error::InvalidInput(format!(
                "field key {s:?} must be schema.element[.qualifier]"
            ))),
        }
    }
}

impl TryFrom<String> for FieldKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldKey> for String {
    fn from(key: FieldKey) -> Self {
        key.to_string()
    }
}
