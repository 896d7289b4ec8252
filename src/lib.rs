//! # pus-mib - PUS/SCOS-2000 MIB extraction from C headers
//!
//! Flight software describes its telecommands and telemetry as packed C
//! structs. This crate reads those headers, understands just enough C to
//! recover the layouts, and produces the data a SCOS-2000 Mission
//! Information Base is generated from: packets with bit-exact field
//! positions and PTC/PFC type codes, identification, repetition groups,
//! calibration curves, verification rules and command verification stages.
//!
//! ## Pipeline
//!
//! ```text
//! SourceFile ─► lexer::clean ─► preprocessor::filter ─► parser::CParser ─► ParsedFile
//!                                                                              │
//!        Extraction ◄─ packet::PacketBuilder ◄─ CalibrationCatalog ◄─ linker::link
//! ```
//!
//! - **lexer**: blanks comments and literals while keeping every offset,
//!   harvests comments and their metadata tags.
//! - **preprocessor**: evaluates `#if`/`#ifdef` chains against a
//!   configured macro map and blanks inactive branches.
//! - **parser**: recognises structs, enums, defines, typedefs and externs.
//! - **linker**: merges files, solves constants and resolves every type
//!   reference regardless of file order.
//! - **calibration**: curves, decalibration, verification rules, stages.
//! - **packet**: turns one root struct into a TC or TM packet.
//!
//! Defects never stop a run. Each stage records a [`Diagnostic`] and
//! carries on, so one extraction reports everything wrong with a header
//! set at once.
//!
//! ## Quick Start
//!
//! ```rust
//! use pus_mib::{ExtractConfig, MibExtractor, PacketKind, SourceFile};
//!
//! # fn main() -> pus_mib::Result<()> {
//! let header = r#"
//! struct TcHead { uint16_t apid; uint8_t type; uint8_t subtype; };
//!
//! /*{ apid: 0x65, type: 8, subtype: 1, desc: "Set heater level" }*/
//! struct SetHeater {
//!     TcHead hdr;
//!     uint16_t level;   // unit: W
//! };
//! "#;
//!
//! let config = ExtractConfig::default().with_root("SetHeater", PacketKind::Tc);
//! let extraction = MibExtractor::new(config)
//!     .extract_sources(vec![SourceFile::new("heater.h", header)])?;
//!
//! let packet = extraction.packet("SetHeater").unwrap();
//! assert_eq!(packet.fields[0].name, "level");
//! assert_eq!(packet.fields[0].position, Some(32));
//! assert_eq!(packet.identification.apid.as_ref().unwrap().value, Some(0x65));
//! assert!(!extraction.diagnostics.has_errors());
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! [`ExtractConfig`] deserializes from JSON:
//!
//! ```rust
//! use pus_mib::ExtractConfig;
//!
//! let config = ExtractConfig::from_json(r#"{
//!     "macros": { "ENABLE_FDIR": true, "N_SENSORS": 4, "LEGACY": false },
//!     "roots": [ { "name": "HkReport", "kind": "tm" } ]
//! }"#).unwrap();
//! assert_eq!(config.roots.len(), 1);
//! ```
//!
//! ## Logging
//!
//! Every stage logs through `tracing`; install any subscriber to see it.
//! Each recorded defect is also emitted at `warn` level.

#![allow(clippy::too_many_arguments)]
#![allow(clippy::manual_strip)] // Existing pattern is clear and works
#![allow(clippy::collapsible_match)] // Separate error handling for clarity

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod calibration;
pub mod config;
pub mod error;
pub mod lexer;
pub mod linker;
pub mod packet;
pub mod parallel;
pub mod parser;
pub mod pipeline;
pub mod preprocessor;

// Re-export main types
pub use calibration::{CalibrationCatalog, CalibrationCurve, CurveKind, EngValue, VerificationRule, VerificationStage};
pub use config::{ExtractConfig, HeaderNames, MacroConfig, MacroValue, PacketRoot};
pub use error::{DefectKind, Diagnostic, Diagnostics, Error, ErrorSeverity, Location, Result};
pub use linker::{link, LinkedTable};
pub use packet::{Field, Packet, PacketKind, RepetitionGroup};
pub use parallel::ParallelConfig;
pub use parser::{parse_file, ParsedFile, SourceFile};
pub use pipeline::{Extraction, MibExtractor};
