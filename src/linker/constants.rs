//! Constant environment: macro values, integer `#define`s and enum constants

use crate::config::{MacroConfig, MacroValue};
use crate::preprocessor::{evaluate, EvalError, Resolver};
use std::collections::BTreeMap;

/// Name → value table used to evaluate dimensions, widths and enum values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Constants {
    values: BTreeMap<String, i64>,
}

impl Constants {
    pub fn get(&self, name: &str) -> Option<i64> {
        self.values.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &i64)> {
        self.values.iter()
    }

    /// Evaluate an integer expression against the table
    pub fn evaluate(&self, text: &str) -> Result<i64, EvalError> {
        evaluate(text, self)
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: i64) {
        self.values.insert(name.into(), value);
    }
}

impl Resolver for Constants {
    fn value(&self, name: &str) -> Result<i64, EvalError> {
        self.get(name)
            .ok_or_else(|| EvalError::Unresolved(name.to_string()))
    }

    fn is_defined(&self, name: &str) -> Option<bool> {
        Some(self.contains(name))
    }
}

/// A named expression waiting for its dependencies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending {
    pub name: String,
    pub expression: String,
}

impl Pending {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Pending {
            name: name.into(),
            expression: expression.into(),
        }
    }
}

/// Evaluate everything that can be evaluated
///
/// Configured macros are seeded first and cannot be overridden. The
/// remaining expressions are retried until a pass makes no progress, so
/// definition order does not matter. Returns the table and whatever stayed
/// unresolved, with the reason.
pub fn solve(macros: &MacroConfig, pending: Vec<Pending>) -> (Constants, Vec<(Pending, EvalError)>) {
    let mut constants = Constants::default();
    let mut pending: Vec<Pending> = pending;

    for (name, value) in macros.iter() {
        match value {
            MacroValue::Value(n) => constants.insert(name.clone(), *n),
            MacroValue::Defined => constants.insert(name.clone(), 1),
            MacroValue::Text(text) => pending.push(Pending::new(name.clone(), text.clone())),
            MacroValue::Undefined => {}
        }
    }
    pending.retain(|p| {
        let pinned = macros.get(&p.name).map_or(false, |v| !matches!(v, MacroValue::Text(_)));
        !pinned
    });

    loop {
        let mut progress = false;
        let mut waiting = Vec::new();
        for item in pending {
            if constants.contains(&item.name) {
                continue;
            }
            match constants.evaluate(&item.expression) {
                Ok(value) => {
                    constants.insert(item.name.clone(), value);
                    progress = true;
                }
                Err(_) => waiting.push(item),
            }
        }
        pending = waiting;
        if !progress || pending.is_empty() {
            break;
        }
    }

    let unresolved = pending
        .into_iter()
        .map(|item| {
            let error = constants
                .evaluate(&item.expression)
                .err()
                .unwrap_or_else(|| EvalError::Syntax("unresolved".to_string()));
            (item, error)
        })
        .collect();

    tracing::debug!(constants = constants.len(), "constant environment solved");
    (constants, unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solves_out_of_order() {
        let pending = vec![
            Pending::new("TOTAL", "COUNT * SIZE"),
            Pending::new("SIZE", "4"),
            Pending::new("COUNT", "N_SENS + 1"),
        ];
        let mut macros = MacroConfig::new();
        macros.set("N_SENS", MacroValue::Value(2));
        let (constants, unresolved) = solve(&macros, pending);
        assert!(unresolved.is_empty());
        assert_eq!(constants.get("TOTAL"), Some(12));
    }

    #[test]
    fn test_config_pins_and_leftovers() {
        let pending = vec![
            Pending::new("N", "10"),
            Pending::new("NAME", "\"str\""),
            Pending::new("M", "UNKNOWN + 1"),
        ];
        let mut macros = MacroConfig::new();
        macros.set("N", MacroValue::Value(3));
        let (constants, unresolved) = solve(&macros, pending);
        assert_eq!(constants.get("N"), Some(3));
        assert_eq!(unresolved.len(), 2);
        assert!(unresolved
            .iter()
            .any(|(p, e)| p.name == "M" && *e == EvalError::Unresolved("UNKNOWN".to_string())));
    }
}
