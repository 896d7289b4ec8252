//! Named calibrations and verification stages declared in comments

use super::curve::{CalibrationCurve, NumberFormat, TextRange};
use super::verify::VerificationStage;
use crate::error::{Diagnostic, Diagnostics, Error};
use crate::lexer::{value_int, value_text, Tags};
use crate::linker::{LinkedTable, ResolvedEnum};
use serde_json::Value;
use std::collections::BTreeMap;

/// Tag keys that reference a calibration from a field
pub const REFERENCE_TAGS: [&str; 3] = ["calib", "cal", "curtx"];

/// Every calibration and stage definition found in the linked comments
#[derive(Debug, Clone, Default)]
pub struct CalibrationCatalog {
    definitions: BTreeMap<String, CalibrationCurve>,
    /// MIB identifier → definition name
    idents: BTreeMap<String, String>,
    stages: BTreeMap<String, VerificationStage>,
}

impl CalibrationCatalog {
    /// Scan every retained comment of the table for definitions
    ///
    /// A comment with `cal_def` or `cal_ident` defines a calibration, one
    /// with `cvs_def` a verification stage. Malformed and duplicate
    /// definitions are reported and left out.
    pub fn build(table: &LinkedTable) -> (Self, Diagnostics) {
        let mut catalog = CalibrationCatalog::default();
        let mut diagnostics = Diagnostics::new();

        for (file, comment) in table.comments() {
            let tags = &comment.entries;
            let location = file.line_map.locate(&file.name, comment.span.start);

            if tags.contains("cal_def") || tags.contains("cal_ident") {
                match parse_definition(tags, table) {
                    Ok(mut curve) => {
                        curve.location = Some(location.clone());
                        if let Err(error) = catalog.insert(curve) {
                            diagnostics.push(Diagnostic::at(error, location.clone()));
                        }
                    }
                    Err(message) => diagnostics.push(Diagnostic::at(Error::calibration(message), location.clone())),
                }
            }

            if tags.contains("cvs_def") {
                match VerificationStage::from_tags(tags) {
                    Ok(mut stage) => {
                        stage.location = Some(location.clone());
                        if catalog.stages.contains_key(&stage.id) {
                            diagnostics.push(Diagnostic::at(
                                Error::calibration(format!("verification stage `{}` defined twice", stage.id)),
                                location,
                            ));
                        } else {
                            catalog.stages.insert(stage.id.clone(), stage);
                        }
                    }
                    Err(message) => diagnostics.push(Diagnostic::at(Error::calibration(message), location)),
                }
            }
        }

        tracing::debug!(
            calibrations = catalog.definitions.len(),
            stages = catalog.stages.len(),
            "calibration catalog built"
        );
        (catalog, diagnostics)
    }

    fn insert(&mut self, curve: CalibrationCurve) -> Result<(), Error> {
        if self.definitions.contains_key(&curve.name) || self.idents.contains_key(&curve.ident) {
            return Err(Error::calibration(format!(
                "calibration `{}` defined twice; keeping the first",
                curve.name
            )));
        }
        self.idents.insert(curve.ident.clone(), curve.name.clone());
        self.definitions.insert(curve.name.clone(), curve);
        Ok(())
    }

    /// Definition by name or MIB identifier
    pub fn definition(&self, reference: &str) -> Option<&CalibrationCurve> {
        self.definitions.get(reference).or_else(|| {
            self.idents
                .get(reference)
                .and_then(|name| self.definitions.get(name))
        })
    }

    pub fn definitions(&self) -> impl Iterator<Item = &CalibrationCurve> {
        self.definitions.values()
    }

    /// Curve named by a field reference: a definition first, then an enum
    pub fn resolve(&self, reference: &str, table: &LinkedTable) -> Result<CalibrationCurve, Error> {
        if let Some(curve) = self.definition(reference) {
            return Ok(curve.clone());
        }
        match table.resolve_enum(reference) {
            Some(resolved) => Ok(textual_from_enum(&resolved)),
            None => Err(Error::calibration(format!("unknown calibration `{}`", reference))),
        }
    }

    pub fn stage(&self, id: &str) -> Option<&VerificationStage> {
        self.stages.get(id)
    }

    pub fn stages(&self) -> impl Iterator<Item = &VerificationStage> {
        self.stages.values()
    }

    /// Stages of a command: its `cvs` list, or every default stage
    pub fn stages_for(&self, tags: &Tags) -> (Vec<String>, Vec<Error>) {
        let listed: Vec<String> = match tags.get("cvs") {
            Some(Value::Array(items)) => items.iter().filter_map(value_text).collect(),
            Some(value) => value_text(value).into_iter().collect(),
            None => {
                let defaults = self.stages.values().filter(|s| s.default).map(|s| s.id.clone());
                return (defaults.collect(), Vec::new());
            }
        };

        let mut errors = Vec::new();
        let known = listed
            .into_iter()
            .filter(|id| {
                let found = self.stages.contains_key(id);
                if !found {
                    errors.push(Error::calibration(format!("unknown verification stage `{}`", id)));
                }
                found
            })
            .collect();
        (known, errors)
    }
}

/// Textual calibration whose labels are an enum's entries
///
/// An entry's `text` tag overrides its name as the label.
pub fn textual_from_enum(resolved: &ResolvedEnum) -> CalibrationCurve {
    let entries = resolved
        .entries
        .iter()
        .map(|entry| TextRange {
            from: entry.value,
            to: entry.value,
            label: entry.tags.text("text").unwrap_or_else(|| entry.name.clone()),
        })
        .collect();
    let mut curve = CalibrationCurve::textual(resolved.name.clone(), entries);
    curve.source_enum = Some(resolved.name.clone());
    curve.description = resolved.tags.text("desc");
    curve
}

fn parse_definition(tags: &Tags, table: &LinkedTable) -> Result<CalibrationCurve, String> {
    let name = tags
        .text("cal_def")
        .or_else(|| tags.text("cal_ident"))
        .ok_or_else(|| "calibration without a name".to_string())?;

    let mut curve = if let Some(points) = tags.get("num_cal") {
        CalibrationCurve::numerical(name.clone(), parse_points(points).map_err(|e| format!("`{}`: {}", name, e))?)
    } else if let Some(value) = tags.get("mcf").or_else(|| tags.get("poly")) {
        CalibrationCurve::polynomial(name.clone(), coefficients(value).map_err(|e| format!("`{}`: {}", name, e))?)
    } else if let Some(value) = tags.get("lgf") {
        CalibrationCurve::logarithmic(name.clone(), coefficients(value).map_err(|e| format!("`{}`: {}", name, e))?)
    } else if let Some(value) = tags.get("text_cal") {
        CalibrationCurve::textual(name.clone(), text_entries(value).map_err(|e| format!("`{}`: {}", name, e))?)
    } else if let Some(enum_name) = tags.text("enum") {
        let resolved = table
            .resolve_enum(&enum_name)
            .ok_or_else(|| format!("calibration `{}` names unknown enum `{}`", name, enum_name))?;
        let mut curve = textual_from_enum(&resolved);
        curve.name = name.clone();
        curve
    } else {
        return Err(format!("calibration `{}` has no curve", name));
    };

    curve.ident = tags.text("cal_ident").unwrap_or_else(|| name.clone());
    curve.description = tags.text("desc").or(curve.description);
    curve.unit = tags.text("unit");
    curve.raw_min = tags.float("min");
    curve.raw_max = tags.float("max");
    if let Some(format) = tags.text("raw_format").and_then(|c| NumberFormat::from_code(&c)) {
        curve.raw_format = format;
    }
    Ok(curve)
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        other => value_int(other).map(|v| v as f64),
    }
}

/// `[[raw, eng], ...]` or `[{raw, eng}, ...]`
fn parse_points(value: &Value) -> Result<Vec<(f64, f64)>, String> {
    let items = value.as_array().ok_or("num_cal is not a list")?;
    if items.is_empty() {
        return Err("num_cal has no points".to_string());
    }
    items
        .iter()
        .map(|item| {
            let pair = match item {
                Value::Array(pair) if pair.len() == 2 => number(&pair[0]).zip(number(&pair[1])),
                Value::Object(map) => map
                    .get("raw")
                    .and_then(number)
                    .zip(map.get("eng").and_then(number)),
                _ => None,
            };
            pair.ok_or_else(|| format!("invalid calibration point {}", item))
        })
        .collect()
}

/// `{a0: .., a1: ..}` or `[a0, a1, ...]`; at most five coefficients
fn coefficients(value: &Value) -> Result<Vec<f64>, String> {
    let values: Vec<f64> = match value {
        Value::Array(items) => items
            .iter()
            .map(|v| number(v).ok_or_else(|| format!("invalid coefficient {}", v)))
            .collect::<Result<_, _>>()?,
        Value::Object(map) => (0..5)
            .map(|i| match map.get(&format!("a{}", i)) {
                Some(v) => number(v).ok_or_else(|| format!("invalid coefficient {}", v)),
                None => Ok(0.0),
            })
            .collect::<Result<_, _>>()?,
        other => return Err(format!("invalid coefficients {}", other)),
    };
    if values.is_empty() || values.len() > 5 {
        return Err(format!("expected 1 to 5 coefficients, found {}", values.len()));
    }
    Ok(values)
}

/// `{lookup: [{val, text} | {from, to, text}, ...]}` or the bare list
fn text_entries(value: &Value) -> Result<Vec<TextRange>, String> {
    let lookup = match value {
        Value::Object(map) => map.get("lookup").ok_or("text_cal has no lookup")?,
        other => other,
    };
    let items = lookup.as_array().ok_or("text_cal lookup is not a list")?;
    items
        .iter()
        .map(|item| {
            let label = item.get("text").and_then(value_text);
            let range = match item.get("val").and_then(value_int) {
                Some(v) => Some((v, v)),
                None => item
                    .get("from")
                    .and_then(value_int)
                    .zip(item.get("to").and_then(value_int)),
            };
            match (range, label) {
                (Some((from, to)), Some(label)) if from <= to => Ok(TextRange { from, to, label }),
                _ => Err(format!("invalid text calibration entry {}", item)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::curve::{CurveKind, EngValue};
    use crate::config::MacroConfig;
    use crate::linker::link;
    use crate::parser::{parse_file, FileId, SourceFile};
    use serde_json::json;

    fn table(text: &str) -> LinkedTable {
        let macros = MacroConfig::new();
        let file = parse_file(FileId(0), &SourceFile::new("cal.h", text), &macros);
        link(vec![file], &macros).0
    }

    const HEADER: &str = r#"
enum Status {
    OK = 0,   // text: Nominal
    FAIL = 1,
};

/*{ cal_def: "TEMP", cal_ident: "CAF001", num_cal: [[0, -40], [100, 60]], unit: "degC" }*/

/*{ cal_def: "GAIN", mcf: { a0: 1, a1: 2 }, desc: "gain" }*/

/* cal_def: MODE
   text_cal: { lookup: [ { val: 0, text: "IDLE" }, { from: 1, to: 3, text: "BUSY" } ] } */

/* cal_def: STAT
   enum: Status */

/*{ cal_def: "BROKEN", num_cal: "nope" }*/

/*{ cvs_def: "ACC", cvs_type: "A", default: true }*/
/*{ cvs_def: "EXE", cvs_type: "C", cvs_interval: 30 }*/
"#;

    #[test]
    fn test_builds_definitions_and_stages() {
        let table = table(HEADER);
        let (catalog, diagnostics) = CalibrationCatalog::build(&table);
        assert_eq!(diagnostics.len(), 1, "{:?}", diagnostics);
        assert_eq!(diagnostics.iter().next().unwrap().location.as_ref().unwrap().line, 17);

        let temp = catalog.definition("CAF001").unwrap();
        assert_eq!(temp.name, "TEMP");
        assert_eq!(temp.unit.as_deref(), Some("degC"));
        assert_eq!(temp.calibrate(50.0), Some(EngValue::Number(10.0)));

        let gain = catalog.definition("GAIN").unwrap();
        assert!(matches!(&gain.kind, CurveKind::Polynomial { coefficients } if coefficients[..2] == [1.0, 2.0]));

        let mode = catalog.definition("MODE").unwrap();
        assert_eq!(mode.calibrate(2.0), Some(EngValue::Text("BUSY".to_string())));

        let stat = catalog.definition("STAT").unwrap();
        assert_eq!(stat.calibrate(0.0), Some(EngValue::Text("Nominal".to_string())));
        assert_eq!(stat.source_enum.as_deref(), Some("Status"));

        assert_eq!(catalog.stages().count(), 2);
        assert_eq!(catalog.stage("EXE").unwrap().interval, 30);
    }

    #[test]
    fn test_resolve_falls_back_to_enums() {
        let table = table(HEADER);
        let (catalog, _) = CalibrationCatalog::build(&table);
        let status = catalog.resolve("Status", &table).unwrap();
        assert_eq!(status.calibrate(1.0), Some(EngValue::Text("FAIL".to_string())));
        assert!(matches!(
            catalog.resolve("Nothing", &table),
            Err(Error::CalibrationError { .. })
        ));
    }

    #[test]
    fn test_stage_lists() {
        let table = table(HEADER);
        let (catalog, _) = CalibrationCatalog::build(&table);

        let (defaults, errors) = catalog.stages_for(&Tags::new());
        assert_eq!(defaults, vec!["ACC".to_string()]);
        assert!(errors.is_empty());

        let tags: Tags = [("cvs".to_string(), json!(["EXE", "LOST"]))].into_iter().collect();
        let (listed, errors) = catalog.stages_for(&tags);
        assert_eq!(listed, vec!["EXE".to_string()]);
        assert_eq!(errors.len(), 1);
    }
}
