//! Run configuration
//!
//! Everything the extractor needs besides the file contents: which macros
//! are defined, which structs are packet roots, which structs are packet
//! headers and how much parallelism to use. All of it deserializes from
//! JSON; reading the file is the caller's business.
//!
//! ```
//! use pus_mib::config::{ExtractConfig, MacroValue};
//! use pus_mib::packet::PacketKind;
//!
//! let config = ExtractConfig::from_json(r#"{
//!     "macros": { "DEBUG": false, "HAS_GPS": true, "N_SENSORS": 4 },
//!     "roots": [ { "name": "HkReport", "kind": "tm" } ]
//! }"#).unwrap();
//!
//! assert_eq!(config.macros.get("DEBUG"), Some(&MacroValue::Undefined));
//! assert_eq!(config.macros.get("N_SENSORS"), Some(&MacroValue::Value(4)));
//! assert_eq!(config.roots[0].kind, PacketKind::Tm);
//! ```

use crate::error::{Error, Result};
use crate::packet::PacketKind;
use crate::parallel::ParallelConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Configured state of one macro
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum MacroValue {
    /// Explicitly not defined (`false` or `null` in JSON)
    Undefined,
    /// Defined without a value (`true`); evaluates to 1
    Defined,
    /// Defined as an integer
    Value(i64),
    /// Defined as replacement text, evaluated on use
    Text(String),
}

impl TryFrom<Value> for MacroValue {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        match value {
            Value::Null | Value::Bool(false) => Ok(MacroValue::Undefined),
            Value::Bool(true) => Ok(MacroValue::Defined),
            Value::Number(n) => n
                .as_i64()
                .map(MacroValue::Value)
                .ok_or_else(|| format!("macro value {} is not an integer", n)),
            Value::String(s) => Ok(MacroValue::Text(s)),
            other => Err(format!("unsupported macro value {}", other)),
        }
    }
}

impl From<MacroValue> for Value {
    fn from(value: MacroValue) -> Self {
        match value {
            MacroValue::Undefined => Value::Bool(false),
            MacroValue::Defined => Value::Bool(true),
            MacroValue::Value(n) => Value::from(n),
            MacroValue::Text(s) => Value::String(s),
        }
    }
}

/// Macro name → configured state
///
/// Names absent from the map are *unknown*, which is different from
/// [`MacroValue::Undefined`]: conditionals over unknown names fail open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MacroConfig(BTreeMap<String, MacroValue>);

impl MacroConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object of macro settings
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::ConfigError(e.to_string()))
    }

    pub fn set(&mut self, name: impl Into<String>, value: MacroValue) -> &mut Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn define(&mut self, name: impl Into<String>) -> &mut Self {
        self.set(name, MacroValue::Defined)
    }

    pub fn undefine(&mut self, name: impl Into<String>) -> &mut Self {
        self.set(name, MacroValue::Undefined)
    }

    pub fn get(&self, name: &str) -> Option<&MacroValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MacroValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A struct designated as a packet root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketRoot {
    /// Struct name
    pub name: String,
    /// Telecommand or telemetry
    pub kind: PacketKind,
}

impl PacketRoot {
    pub fn new(name: impl Into<String>, kind: PacketKind) -> Self {
        PacketRoot {
            name: name.into(),
            kind,
        }
    }
}

/// Struct names recognised as packet headers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderNames {
    /// Telecommand header structs
    pub tc: Vec<String>,
    /// Telemetry header structs
    pub tm: Vec<String>,
}

impl Default for HeaderNames {
    fn default() -> Self {
        HeaderNames {
            tc: vec!["TcHead".to_string(), "SpwHead".to_string()],
            tm: vec!["TmHead".to_string()],
        }
    }
}

impl HeaderNames {
    /// True if `struct_name` is a configured header for `kind`
    pub fn contains(&self, kind: PacketKind, struct_name: &str) -> bool {
        let names = match kind {
            PacketKind::Tc => &self.tc,
            PacketKind::Tm => &self.tm,
        };
        names.iter().any(|n| n == struct_name)
    }
}

/// Complete configuration of one extraction run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Macro definedness for conditional compilation
    pub macros: MacroConfig,
    /// Packet roots, constructed in this order
    pub roots: Vec<PacketRoot>,
    /// Header struct names
    pub headers: HeaderNames,
    /// Worker pool settings
    pub parallel: ParallelConfig,
}

impl ExtractConfig {
    /// Parse a JSON configuration document
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::ConfigError(e.to_string()))
    }

    /// Add a packet root
    pub fn with_root(mut self, name: impl Into<String>, kind: PacketKind) -> Self {
        self.roots.push(PacketRoot::new(name, kind));
        self
    }

    /// Replace the macro map
    pub fn with_macros(mut self, macros: MacroConfig) -> Self {
        self.macros = macros;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macro_values_from_json() {
        let macros =
            MacroConfig::from_json(r#"{"A": null, "B": true, "C": 7, "D": "C + 1"}"#).unwrap();
        assert_eq!(macros.get("A"), Some(&MacroValue::Undefined));
        assert_eq!(macros.get("B"), Some(&MacroValue::Defined));
        assert_eq!(macros.get("C"), Some(&MacroValue::Value(7)));
        assert_eq!(macros.get("D"), Some(&MacroValue::Text("C + 1".to_string())));
        assert_eq!(macros.get("E"), None);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(MacroConfig::from_json(r#"{"A": 1.5}"#).is_err());
        assert!(matches!(
            ExtractConfig::from_json(r#"{"roots": [{"name": "X", "kind": "both"}]}"#),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_defaults_and_builders() {
        let config = ExtractConfig::default().with_root("Cmd", PacketKind::Tc);
        assert!(config.headers.contains(PacketKind::Tc, "TcHead"));
        assert!(!config.headers.contains(PacketKind::Tm, "TcHead"));
        assert_eq!(config.roots, vec![PacketRoot::new("Cmd", PacketKind::Tc)]);
        assert!(config.parallel.max_parallelism >= 1);
    }

    #[test]
    fn test_round_trips_through_json() {
        let mut macros = MacroConfig::new();
        macros.define("X").undefine("Y");
        let text = serde_json::to_string(&macros).unwrap();
        assert_eq!(text, r#"{"X":true,"Y":false}"#);
        assert_eq!(MacroConfig::from_json(&text).unwrap(), macros);
    }
}
