//! Calibration and verification
//!
//! Calibrations are declared in comments (`cal_def` plus a curve body) or
//! borrowed from enums; [`CalibrationCatalog`] collects them once per run.
//! Fields pick a curve through a `calib`/`cal`/`curtx` tag, and an
//! enum-typed field without one falls back to its own enum. Verification
//! rules and command verification stages live here too.

mod catalog;
mod curve;
mod verify;

pub use catalog::{textual_from_enum, CalibrationCatalog, REFERENCE_TAGS};
pub use curve::{CalibrationCurve, CurveKind, EngValue, NumberFormat, TextRange};
pub use verify::{StageSource, StageType, VerificationRule, VerificationStage};
