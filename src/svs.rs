//! The pipe-delimited key/value payload Aperio stores in `ImageDescription`.

use std::fmt;

use indexmap::IndexMap;

/// A single description value.
///
/// The raw text is kept verbatim so an untouched description serializes
/// back byte for byte; whether it reads as an integer or float only matters
/// to `check_type` rules.
#[derive(Debug, Clone, PartialEq)]
pub struct SvsValue(String);

impl SvsValue {
    pub fn new(raw: impl Into<String>) -> SvsValue {
        SvsValue(raw.into())
    }

    pub fn is_integer(&self) -> bool {
        self.0.parse::<i64>().is_ok()
    }

    pub fn is_number(&self) -> bool {
        self.is_integer() || self.0.parse::<f64>().is_ok()
    }

    /// The value as text, for rules expecting a string. Values that parse
    /// as numbers are numbers, not text.
    pub fn as_text(&self) -> Option<&str> {
        if self.is_number() {
            None
        } else {
            Some(&self.0)
        }
    }

    pub fn raw(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SvsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A parsed Aperio description: `prefix|key = value|key = value|…`.
///
/// Key order is insertion order, so a description that no rule touches
/// serializes back to the exact original string.
#[derive(Debug, Clone, PartialEq)]
pub struct SvsDescription {
    pub prefix: String,
    pub metadata: IndexMap<String, SvsValue>,
}

impl SvsDescription {
    pub fn parse(description: &str) -> SvsDescription {
        let mut components = description.split('|');
        let prefix = components.next().unwrap_or_default().to_string();

        let mut metadata = IndexMap::new();
        for component in components {
            let (key, value) = match component.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => (component.trim(), ""),
            };
            metadata.insert(key.to_string(), SvsValue::new(value));
        }

        SvsDescription { prefix, metadata }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.metadata.keys()
    }

    pub fn get(&self, key: &str) -> Option<&SvsValue> {
        self.metadata.get(key)
    }

    pub fn insert(&mut self, key: &str, value: SvsValue) {
        self.metadata.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<SvsValue> {
        self.metadata.shift_remove(key)
    }
}

impl fmt::Display for SvsDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix)?;
        for (key, value) in &self.metadata {
            write!(f, "|{key} = {value}")?;
        }
        Ok(())
    }
}
