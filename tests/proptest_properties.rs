//! Property-based tests for the extraction pipeline
//!
//! These tests use proptest to generate inputs and verify that:
//! 1. Cleaning and filtering never move a retained byte
//! 2. File order never changes the constructed packets
//! 3. Field widths always add up to the declared packet length
//! 4. Decalibration undoes calibration wherever it exists

use proptest::prelude::*;
use pus_mib::calibration::{CalibrationCurve, EngValue, NumberFormat, TextRange};
use pus_mib::lexer::clean;
use pus_mib::preprocessor::filter;
use pus_mib::{DefectKind, ErrorSeverity, ExtractConfig, MacroConfig, MacroValue, MibExtractor, PacketKind, SourceFile};

// =============================================================================
// STRATEGY GENERATORS
// =============================================================================

/// C-ish text with comments, literals and unterminated constructs
fn c_like_source() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            Just("struct S { uint8_t a; };".to_string()),
            Just("/* block */".to_string()),
            Just("/*{ desc: \"x\" }*/".to_string()),
            Just("// line\n".to_string()),
            Just("\"str\\\"ing\"".to_string()),
            Just("'c'".to_string()),
            Just("/*".to_string()),
            Just("\"".to_string()),
            Just("\n".to_string()),
            "[a-z0-9_ ;{}*/]{1,8}",
        ],
        0..40,
    )
    .prop_map(|parts| parts.concat())
}

/// Lines with conditional directives, possibly unbalanced
fn directive_source() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            Just("#ifdef FEATURE"),
            Just("#ifndef LEGACY"),
            Just("#if LEVEL > 1"),
            Just("#if UNKNOWN_MACRO"),
            Just("#elif LEVEL == 2"),
            Just("#else"),
            Just("#endif"),
            Just("#define LOCAL 3"),
            Just("#undef LOCAL"),
            Just("struct S { int x; };"),
            Just(""),
        ],
        0..30,
    )
    .prop_map(|lines| lines.join("\n"))
}

#[derive(Debug, Clone, Copy)]
struct Scalar {
    c_type: &'static str,
    bits: u64,
}

fn scalar() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        Just(Scalar { c_type: "uint8_t", bits: 8 }),
        Just(Scalar { c_type: "int8_t", bits: 8 }),
        Just(Scalar { c_type: "uint16_t", bits: 16 }),
        Just(Scalar { c_type: "int16_t", bits: 16 }),
        Just(Scalar { c_type: "uint32_t", bits: 32 }),
        Just(Scalar { c_type: "int32_t", bits: 32 }),
        Just(Scalar { c_type: "float", bits: 32 }),
        Just(Scalar { c_type: "double", bits: 64 }),
        Just(Scalar { c_type: "uint64_t", bits: 64 }),
    ]
}

/// Member list of `(type, array length)`; length 0 means scalar
fn members() -> impl Strategy<Value = Vec<(Scalar, u64)>> {
    prop::collection::vec((scalar(), prop_oneof![Just(0u64), 1u64..5]), 1..12)
}

const HEAD: &str = "struct TmHead { uint16_t apid; uint8_t service; uint8_t subtype; };\n";

fn render(name: &str, members: &[(Scalar, u64)]) -> String {
    let body: String = members
        .iter()
        .enumerate()
        .map(|(i, (s, n))| match n {
            0 => format!("    {} m{};\n", s.c_type, i),
            n => format!("    {} m{}[{}];\n", s.c_type, i, n),
        })
        .collect();
    format!("struct {} {{\n    TmHead head;\n{}}};\n", name, body)
}

fn errors(diagnostics: &pus_mib::Diagnostics, kind: DefectKind) -> usize {
    diagnostics
        .of_kind(kind)
        .filter(|d| d.severity != ErrorSeverity::Warning)
        .count()
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_cleaning_preserves_positions(source in c_like_source()) {
        let cleaned = clean(&source);
        prop_assert_eq!(cleaned.text.len(), source.len());
        for (before, after) in source.bytes().zip(cleaned.text.bytes()) {
            prop_assert!(after == before || (after == b' ' && before != b'\n'));
        }
    }

    #[test]
    fn prop_filtering_preserves_positions(source in directive_source()) {
        let mut macros = MacroConfig::new();
        macros.define("FEATURE").set("LEVEL", MacroValue::Value(2));
        let output = filter(&source, &macros);
        for text in [&output.filtered, &output.cleaned] {
            prop_assert_eq!(text.len(), source.len());
            for (before, after) in source.bytes().zip(text.bytes()) {
                prop_assert!(after == before || (after == b' ' && before != b'\n'));
            }
        }
    }

    #[test]
    fn prop_file_order_does_not_matter(
        first in members(),
        second in members(),
        rotation in 0usize..3,
    ) {
        let files = vec![
            SourceFile::new("head.h", HEAD),
            SourceFile::new("a.h", render("PktA", &first)),
            SourceFile::new("b.h", render("PktB", &second)),
        ];
        let mut rotated = files.clone();
        rotated.rotate_left(rotation);
        let config = ExtractConfig::default()
            .with_root("PktA", PacketKind::Tm)
            .with_root("PktB", PacketKind::Tm);

        let extractor = MibExtractor::new(config);
        let original = extractor.extract_sources(files).unwrap();
        let permuted = extractor.extract_sources(rotated).unwrap();
        prop_assert_eq!(original.packets, permuted.packets);
    }

    #[test]
    fn prop_field_widths_add_up(body in members()) {
        let config = ExtractConfig::default().with_root("Pkt", PacketKind::Tm);
        let extraction = MibExtractor::new(config)
            .extract_sources(vec![SourceFile::new("pkt.h", format!("{}{}", HEAD, render("Pkt", &body)))])
            .unwrap();
        prop_assert_eq!(errors(&extraction.diagnostics, DefectKind::Mapping), 0);

        let expected: u64 = 32 + body.iter().map(|(s, n)| s.bits * (*n).max(1)).sum::<u64>();
        let packet = extraction.packet("Pkt").unwrap();
        let summed: u64 = packet.all_fields().map(|f| f.total_bits().unwrap()).sum();
        prop_assert_eq!(summed, expected);
        prop_assert_eq!(packet.computed_bits, Some(expected));
        prop_assert_eq!(packet.declared_bits, Some(expected));

        let mut position = 0;
        for field in packet.all_fields() {
            prop_assert_eq!(field.position, Some(position));
            position += field.total_bits().unwrap();
        }
    }

    #[test]
    fn prop_length_mismatch_is_reported(body in members(), extra in 1u64..16) {
        let size: u64 = 4 + body.iter().map(|(s, n)| s.bits / 8 * (*n).max(1)).sum::<u64>();
        let source = format!("{}/*{{ length: {} }}*/\n{}", HEAD, size + extra, render("Pkt", &body));
        let config = ExtractConfig::default().with_root("Pkt", PacketKind::Tm);
        let extraction = MibExtractor::new(config)
            .extract_sources(vec![SourceFile::new("pkt.h", source)])
            .unwrap();
        prop_assert_eq!(errors(&extraction.diagnostics, DefectKind::Mapping), 1);
    }

    #[test]
    fn prop_linear_round_trip(a0 in -1000i64..1000, a1 in 1i64..50, negative in any::<bool>(), raw in 0i64..10_000) {
        let slope = (if negative { -a1 } else { a1 }) as f64;
        let mut curve = CalibrationCurve::polynomial("LIN", vec![a0 as f64, slope]);
        curve.raw_format = NumberFormat::Unsigned;
        let eng = curve.calibrate(raw as f64).unwrap();
        prop_assert_eq!(curve.decalibrate(&eng), Some(raw as f64));
    }

    #[test]
    fn prop_numerical_round_trip(
        steps in prop::collection::vec((1i64..100, 1i64..100), 1..8),
        pick in 0usize..64,
    ) {
        let mut raw = 0i64;
        let mut eng = 0i64;
        let mut points = vec![(0.0, 0.0)];
        for (dr, de) in &steps {
            raw += dr;
            eng += de;
            points.push((raw as f64, eng as f64));
        }
        let curve = CalibrationCurve::numerical("NUM", points.clone());
        prop_assert!(curve.raw_format.is_integer());

        let (x, _) = points[pick % points.len()];
        let y = curve.calibrate(x).unwrap();
        prop_assert_eq!(curve.decalibrate(&y), Some(x));
    }

    #[test]
    fn prop_textual_round_trip(count in 1usize..20, pick in 0usize..20) {
        let entries: Vec<TextRange> = (0..count)
            .map(|i| TextRange { from: i as i64 * 3, to: i as i64 * 3, label: format!("STATE_{}", i) })
            .collect();
        let curve = CalibrationCurve::textual("TXT", entries);
        let index = pick % count;
        let raw = (index * 3) as f64;
        let label = curve.calibrate(raw).unwrap();
        prop_assert_eq!(&label, &EngValue::Text(format!("STATE_{}", index)));
        prop_assert_eq!(curve.decalibrate(&label), Some(raw));
    }
}
