//! Calibration curves: raw value → engineering value, and back
//!
//! Four shapes are supported, matching the SCOS-2000 calibration tables:
//! numerical point lists (CAF/CAP), polynomials (MCF), logarithmic curves
//! (LGF) and textual lookups (TXF/TXP). The inverse direction only exists
//! where the forward curve is provably one-to-one;
//! [`CalibrationCurve::invertibility`] says why when it is not.

use crate::error::Location;
use serde::Serialize;
use std::fmt;

/// Raw or engineering number representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NumberFormat {
    #[serde(rename = "U")]
    Unsigned,
    #[serde(rename = "I")]
    Signed,
    #[serde(rename = "R")]
    Real,
}

impl NumberFormat {
    /// Narrowest format holding every value
    pub fn of(values: impl IntoIterator<Item = f64>) -> Self {
        let mut format = NumberFormat::Unsigned;
        for value in values {
            if value.fract() != 0.0 || !value.is_finite() {
                return NumberFormat::Real;
            }
            if value < 0.0 {
                format = NumberFormat::Signed;
            }
        }
        format
    }

    /// Parse the single-letter MIB code
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "U" | "u" => Some(NumberFormat::Unsigned),
            "I" | "i" => Some(NumberFormat::Signed),
            "R" | "r" => Some(NumberFormat::Real),
            _ => None,
        }
    }

    pub fn code(&self) -> char {
        match self {
            NumberFormat::Unsigned => 'U',
            NumberFormat::Signed => 'I',
            NumberFormat::Real => 'R',
        }
    }

    pub fn is_integer(&self) -> bool {
        !matches!(self, NumberFormat::Real)
    }
}

/// One row of a textual calibration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRange {
    pub from: i64,
    pub to: i64,
    pub label: String,
}

/// Shape of a curve
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CurveKind {
    /// Points sorted by raw value, linearly interpolated
    Numerical {
        points: Vec<(f64, f64)>,
        raw_format: NumberFormat,
        eng_format: NumberFormat,
    },
    /// `y = a0 + a1·x + a2·x² + ...`
    Polynomial { coefficients: Vec<f64> },
    /// `y = 1 / (a0 + a1·ln x + a2·ln² x + ...)`
    Logarithmic { coefficients: Vec<f64> },
    /// Raw ranges mapped to labels
    Textual { entries: Vec<TextRange> },
}

/// An engineering value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EngValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for EngValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngValue::Number(n) => write!(f, "{}", n),
            EngValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A named calibration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationCurve {
    /// Name fields refer to it by
    pub name: String,
    /// MIB identifier (CAF_NUMBR, MCF_IDENT, TXF_NUMBR, ...)
    pub ident: String,
    pub kind: CurveKind,
    pub description: Option<String>,
    pub unit: Option<String>,
    /// Lowest valid raw value
    pub raw_min: Option<f64>,
    /// Highest valid raw value
    pub raw_max: Option<f64>,
    /// Raw representation; inverted values are rounded when integral
    pub raw_format: NumberFormat,
    /// Enum the labels came from
    pub source_enum: Option<String>,
    pub location: Option<Location>,
}

impl CalibrationCurve {
    pub fn new(name: impl Into<String>, kind: CurveKind) -> Self {
        let name = name.into();
        let raw_format = match &kind {
            CurveKind::Numerical { raw_format, .. } => *raw_format,
            CurveKind::Textual { entries } => {
                NumberFormat::of(entries.iter().flat_map(|e| [e.from as f64, e.to as f64]))
            }
            _ => NumberFormat::Real,
        };
        CalibrationCurve {
            ident: name.clone(),
            name,
            kind,
            description: None,
            unit: None,
            raw_min: None,
            raw_max: None,
            raw_format,
            source_enum: None,
            location: None,
        }
    }

    /// Numerical curve from unsorted `(raw, eng)` points
    pub fn numerical(name: impl Into<String>, mut points: Vec<(f64, f64)>) -> Self {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let raw_format = NumberFormat::of(points.iter().map(|p| p.0));
        let eng_format = NumberFormat::of(points.iter().map(|p| p.1));
        Self::new(
            name,
            CurveKind::Numerical {
                points,
                raw_format,
                eng_format,
            },
        )
    }

    pub fn polynomial(name: impl Into<String>, coefficients: Vec<f64>) -> Self {
        Self::new(name, CurveKind::Polynomial { coefficients })
    }

    pub fn logarithmic(name: impl Into<String>, coefficients: Vec<f64>) -> Self {
        Self::new(name, CurveKind::Logarithmic { coefficients })
    }

    pub fn textual(name: impl Into<String>, entries: Vec<TextRange>) -> Self {
        Self::new(name, CurveKind::Textual { entries })
    }

    pub fn is_textual(&self) -> bool {
        matches!(self.kind, CurveKind::Textual { .. })
    }

    /// Engineering value of `raw`
    pub fn calibrate(&self, raw: f64) -> Option<EngValue> {
        match &self.kind {
            CurveKind::Numerical { points, .. } => interpolate(points, raw).map(EngValue::Number),
            CurveKind::Polynomial { coefficients } => Some(EngValue::Number(horner(coefficients, raw))),
            CurveKind::Logarithmic { coefficients } => {
                if raw <= 0.0 {
                    return None;
                }
                let denominator = horner(coefficients, raw.ln());
                (denominator != 0.0).then(|| EngValue::Number(1.0 / denominator))
            }
            CurveKind::Textual { entries } => {
                if raw.fract() != 0.0 {
                    return None;
                }
                let raw = raw as i64;
                entries
                    .iter()
                    .find(|e| e.from <= raw && raw <= e.to)
                    .map(|e| EngValue::Text(e.label.clone()))
            }
        }
    }

    /// `Ok` when the curve is one-to-one, otherwise the reason it is not
    pub fn invertibility(&self) -> Result<(), String> {
        match &self.kind {
            CurveKind::Numerical { points, .. } => {
                if points.len() < 2 {
                    return Err("fewer than two calibration points".to_string());
                }
                if points.windows(2).any(|w| w[0].0 >= w[1].0) {
                    return Err("raw values are not strictly increasing".to_string());
                }
                let rising = points.windows(2).all(|w| w[0].1 < w[1].1);
                let falling = points.windows(2).all(|w| w[0].1 > w[1].1);
                if rising || falling {
                    Ok(())
                } else {
                    Err("engineering values are not strictly monotonic".to_string())
                }
            }
            CurveKind::Polynomial { coefficients } => match degree(coefficients) {
                0 => Err("polynomial is constant".to_string()),
                1 => Ok(()),
                2 => {
                    let vertex = -coefficients[1] / (2.0 * coefficients[2]);
                    match (self.raw_min, self.raw_max) {
                        (Some(min), _) if vertex < min => Ok(()),
                        (_, Some(max)) if vertex > max => Ok(()),
                        (Some(_), Some(_)) | (Some(_), None) | (None, Some(_)) => Err(format!(
                            "quadratic turns at raw {} inside the valid range",
                            vertex
                        )),
                        (None, None) => Err("quadratic without a raw range".to_string()),
                    }
                }
                n => Err(format!("polynomial of degree {} is not provably invertible", n)),
            },
            CurveKind::Logarithmic { coefficients } => {
                let a1 = coefficients.get(1).copied().unwrap_or(0.0);
                if coefficients.iter().skip(2).any(|a| *a != 0.0) {
                    Err("logarithmic curve has higher-order terms".to_string())
                } else if a1 == 0.0 {
                    Err("logarithmic curve is constant".to_string())
                } else {
                    Ok(())
                }
            }
            CurveKind::Textual { entries } => {
                if let Some(e) = entries.iter().find(|e| e.from != e.to) {
                    return Err(format!("label `{}` covers a range of raw values", e.label));
                }
                for (i, a) in entries.iter().enumerate() {
                    for b in &entries[i + 1..] {
                        if a.from == b.from {
                            return Err(format!("raw value {} has two labels", a.from));
                        }
                        if a.label == b.label {
                            return Err(format!("label `{}` is used twice", a.label));
                        }
                    }
                }
                Ok(())
            }
        }
    }

    pub fn is_invertible(&self) -> bool {
        self.invertibility().is_ok()
    }

    /// Raw value of an engineering value; `None` when the curve has no
    /// inverse or the value is outside it
    pub fn decalibrate(&self, eng: &EngValue) -> Option<f64> {
        self.invertibility().ok()?;
        let raw = match (&self.kind, eng) {
            (CurveKind::Numerical { points, .. }, EngValue::Number(y)) => {
                let swapped: Vec<(f64, f64)> = if points[0].1 < points[points.len() - 1].1 {
                    points.iter().map(|p| (p.1, p.0)).collect()
                } else {
                    points.iter().rev().map(|p| (p.1, p.0)).collect()
                };
                interpolate(&swapped, *y)?
            }
            (CurveKind::Polynomial { coefficients }, EngValue::Number(y)) => {
                self.invert_polynomial(coefficients, *y)?
            }
            (CurveKind::Logarithmic { coefficients }, EngValue::Number(y)) => {
                if *y == 0.0 {
                    return None;
                }
                let a0 = coefficients.first().copied().unwrap_or(0.0);
                let a1 = coefficients.get(1).copied().unwrap_or(0.0);
                ((1.0 / y - a0) / a1).exp()
            }
            (CurveKind::Textual { entries }, EngValue::Text(label)) => {
                entries.iter().find(|e| &e.label == label)?.from as f64
            }
            _ => return None,
        };
        Some(if self.raw_format.is_integer() { raw.round() } else { raw })
    }

    fn invert_polynomial(&self, coefficients: &[f64], y: f64) -> Option<f64> {
        let a0 = coefficients[0];
        let a1 = coefficients.get(1).copied().unwrap_or(0.0);
        if degree(coefficients) == 1 {
            return Some((y - a0) / a1);
        }
        let a2 = coefficients[2];
        let discriminant = a1 * a1 - 4.0 * a2 * (a0 - y);
        if discriminant < 0.0 {
            return None;
        }
        let vertex = -a1 / (2.0 * a2);
        let offset = discriminant.sqrt() / (2.0 * a2).abs();
        // The valid range lies entirely on one side of the vertex
        let above = self.raw_min.map_or(false, |min| vertex < min);
        Some(if above { vertex + offset } else { vertex - offset })
    }
}

/// Highest non-zero power
fn degree(coefficients: &[f64]) -> usize {
    coefficients
        .iter()
        .rposition(|a| *a != 0.0)
        .unwrap_or(0)
}

fn horner(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, a| acc * x + a)
}

/// Piecewise-linear interpolation over points sorted by `x`; the edge
/// segments extrapolate
fn interpolate(points: &[(f64, f64)], x: f64) -> Option<f64> {
    match points {
        [] => None,
        [(px, py)] => (*px == x).then_some(*py),
        _ => {
            let i = points
                .windows(2)
                .position(|w| x <= w[1].0)
                .unwrap_or(points.len() - 2);
            let (x0, y0) = points[i];
            let (x1, y1) = points[i + 1];
            if x1 == x0 {
                return Some(y0);
            }
            Some(y0 + (x - x0) * (y1 - y0) / (x1 - x0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(i64, &str)]) -> Vec<TextRange> {
        pairs
            .iter()
            .map(|(v, l)| TextRange {
                from: *v,
                to: *v,
                label: l.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_numerical_interpolation() {
        let curve = CalibrationCurve::numerical("T", vec![(100.0, 10.0), (0.0, -40.0), (50.0, 0.0)]);
        assert_eq!(curve.calibrate(25.0), Some(EngValue::Number(-20.0)));
        assert_eq!(curve.calibrate(75.0), Some(EngValue::Number(5.0)));
        assert_eq!(curve.calibrate(200.0), Some(EngValue::Number(30.0)));
        assert_eq!(curve.raw_format, NumberFormat::Unsigned);
        assert_eq!(curve.decalibrate(&EngValue::Number(5.0)), Some(75.0));
        assert_eq!(curve.decalibrate(&EngValue::Number(-19.0)), Some(26.0));
    }

    #[test]
    fn test_falling_numerical_curve_inverts() {
        let curve = CalibrationCurve::numerical("V", vec![(0.0, 5.0), (10.0, 0.0)]);
        assert!(curve.is_invertible());
        assert_eq!(curve.decalibrate(&EngValue::Number(2.5)), Some(5.0));
    }

    #[test]
    fn test_non_monotonic_numerical_is_not_invertible() {
        let curve = CalibrationCurve::numerical("N", vec![(0.0, 0.0), (1.0, 5.0), (2.0, 1.0)]);
        assert!(curve.calibrate(1.5).is_some());
        assert!(curve.invertibility().is_err());
        assert_eq!(curve.decalibrate(&EngValue::Number(2.0)), None);
    }

    #[test]
    fn test_polynomial_inversion_rules() {
        let linear = CalibrationCurve::polynomial("L", vec![-10.0, 0.5]);
        assert_eq!(linear.calibrate(40.0), Some(EngValue::Number(10.0)));
        assert_eq!(linear.decalibrate(&EngValue::Number(10.0)), Some(40.0));

        let mut quadratic = CalibrationCurve::polynomial("Q", vec![0.0, 0.0, 1.0]);
        assert!(quadratic.invertibility().is_err());
        quadratic.raw_min = Some(0.0);
        quadratic.raw_max = Some(100.0);
        assert!(quadratic.invertibility().is_err());
        quadratic.raw_min = Some(1.0);
        assert!(quadratic.is_invertible());
        assert_eq!(quadratic.decalibrate(&EngValue::Number(49.0)), Some(7.0));

        let cubic = CalibrationCurve::polynomial("C", vec![0.0, 1.0, 0.0, 1.0]);
        assert!(cubic.invertibility().is_err());
        assert!(CalibrationCurve::polynomial("K", vec![3.0]).invertibility().is_err());
    }

    #[test]
    fn test_logarithmic_curve() {
        let curve = CalibrationCurve::logarithmic("G", vec![0.5, 0.25, 0.0, 0.0, 0.0]);
        let eng = curve.calibrate(1.0).unwrap();
        assert_eq!(eng, EngValue::Number(2.0));
        assert_eq!(curve.decalibrate(&eng), Some(1.0));
        assert_eq!(curve.calibrate(0.0), None);
        let higher = CalibrationCurve::logarithmic("H", vec![0.5, 0.25, 1.0]);
        assert!(higher.invertibility().is_err());
    }

    #[test]
    fn test_textual_lookup_and_bijection() {
        let curve = CalibrationCurve::textual("S", labels(&[(0, "OK"), (1, "FAIL")]));
        assert_eq!(curve.calibrate(1.0), Some(EngValue::Text("FAIL".to_string())));
        assert_eq!(curve.calibrate(2.0), None);
        assert_eq!(curve.decalibrate(&EngValue::Text("OK".to_string())), Some(0.0));

        let shared = CalibrationCurve::textual("D", labels(&[(0, "OFF"), (1, "OFF")]));
        assert!(shared.invertibility().unwrap_err().contains("used twice"));

        let ranged = CalibrationCurve::textual(
            "R",
            vec![TextRange {
                from: 0,
                to: 9,
                label: "LOW".to_string(),
            }],
        );
        assert_eq!(ranged.calibrate(5.0), Some(EngValue::Text("LOW".to_string())));
        assert!(!ranged.is_invertible());
    }

    #[test]
    fn test_number_format_inference() {
        assert_eq!(NumberFormat::of([1.0, 2.0]), NumberFormat::Unsigned);
        assert_eq!(NumberFormat::of([-1.0, 2.0]), NumberFormat::Signed);
        assert_eq!(NumberFormat::of([-1.0, 2.5]), NumberFormat::Real);
        assert_eq!(NumberFormat::from_code("I"), Some(NumberFormat::Signed));
        assert_eq!(NumberFormat::Real.code(), 'R');
    }
}
