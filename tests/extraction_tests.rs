//! End-to-end extraction over small header sets
//!
//! Lexer → Preprocessor → Parser → Linker → Packet construction.

use pus_mib::calibration::CurveKind;
use pus_mib::packet::{Category, TypeCode};
use pus_mib::{
    DefectKind, ExtractConfig, Extraction, MacroConfig, MacroValue, MibExtractor, PacketKind, SourceFile,
};

fn extract(config: ExtractConfig, files: &[(&str, &str)]) -> Extraction {
    let sources = files
        .iter()
        .map(|(name, text)| SourceFile::new(*name, *text))
        .collect();
    MibExtractor::new(config).extract_sources(sources).unwrap()
}

#[test]
fn test_header_expanded_before_parameters() {
    let extraction = extract(
        ExtractConfig::default().with_root("Pkt1", PacketKind::Tc),
        &[(
            "pkt1.h",
            "struct Pkt1Header{uint16_t apid; uint8_t type;}; struct Pkt1{Pkt1Header hdr; uint8_t param1;};",
        )],
    );
    assert!(!extraction.diagnostics.has_errors(), "{:?}", extraction.diagnostics);

    let packet = extraction.packet("Pkt1").unwrap();
    let order: Vec<_> = packet.all_fields().map(|f| f.path.as_str()).collect();
    assert_eq!(order, ["hdr.apid", "hdr.type", "param1"]);
    assert_eq!(packet.header.len(), 2);
    assert_eq!(packet.fields.len(), 1);
    assert_eq!(packet.field("param1").unwrap().position, Some(24));
    assert_eq!(packet.computed_bits, Some(32));
    assert_eq!(packet.identification.apid.as_ref().unwrap().field.as_deref(), Some("hdr.apid"));
}

#[test]
fn test_enum_reference_becomes_textual_calibration() {
    let extraction = extract(
        ExtractConfig::default().with_root("Report", PacketKind::Tm),
        &[(
            "report.h",
            "enum Status{OK=0,FAIL=1};\n\
             struct TmHead { uint16_t apid; uint8_t service; uint8_t subtype; };\n\
             struct Report {\n\
                 TmHead head;\n\
                 // calib: Status\n\
                 uint8_t status;\n\
             };\n",
        )],
    );
    assert!(!extraction.diagnostics.has_errors(), "{:?}", extraction.diagnostics);

    let packet = extraction.packet("Report").unwrap();
    let status = packet.field("status").unwrap();
    assert_eq!(status.calibration.as_deref(), Some("Status"));
    assert_eq!(status.category, Category::Status);

    let curve = extraction.calibration("Status").unwrap();
    let CurveKind::Textual { entries } = &curve.kind else {
        panic!("expected a textual curve, got {:?}", curve.kind);
    };
    let labels: Vec<_> = entries.iter().map(|e| (e.from, e.label.as_str())).collect();
    assert_eq!(labels, [(0, "OK"), (1, "FAIL")]);
}

#[test]
fn test_undefined_macro_removes_struct() {
    let mut macros = MacroConfig::new();
    macros.set("DEBUG", MacroValue::Undefined);
    let config = ExtractConfig::default()
        .with_macros(macros)
        .with_root("Dbg", PacketKind::Tm)
        .with_root("Kept", PacketKind::Tm);
    let extraction = extract(
        config,
        &[(
            "debug.h",
            "#ifdef DEBUG\nstruct Dbg { uint8_t x; };\n#endif\nstruct Kept { uint8_t y; };\n",
        )],
    );

    assert!(extraction.table.symbol("Dbg").is_none());
    assert!(extraction.table.symbol("Kept").is_some());
    assert!(extraction.packet("Dbg").is_none());
    assert!(extraction.packet("Kept").is_some());
    assert!(extraction
        .diagnostics
        .of_kind(DefectKind::Mapping)
        .any(|d| d.error.message().contains("Dbg")));
}

#[test]
fn test_conflicting_definitions_cite_both_files() {
    let extraction = extract(
        ExtractConfig::default().with_root("Shared", PacketKind::Tm),
        &[
            ("first.h", "struct Shared { uint8_t a; };"),
            ("second.h", "struct Shared { uint16_t b; uint16_t c; };"),
        ],
    );

    let conflicts: Vec<_> = extraction.diagnostics.of_kind(DefectKind::Link).collect();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].file(), Some("second.h"));
    assert_eq!(conflicts[0].related.len(), 1);
    assert_eq!(conflicts[0].related[0].file, "first.h");

    let packet = extraction.packet("Shared").unwrap();
    let names: Vec<_> = packet.all_fields().map(|f| f.path.as_str()).collect();
    assert_eq!(names, ["a"]);
}

const COMMAND_SET: &str = r#"
/*{ cvs_def: "ACC", cvs_type: "A", cvs_interval: 5, default: true }*/
/*{ cvs_def: "EXE", cvs_type: "C", cvs_interval: 30 }*/
/*{ cal_def: "POWER", cal_ident: "CAL_PWR", num_cal: [[0, 0], [1000, 50]], unit: "W" }*/

#define N_HEATERS 4
#define HEATER_APID 0x65

struct TcHead {
    uint16_t apid;
    uint8_t type;
    uint8_t subtype;
};

#ifdef LEGACY_HEATERS
struct LegacyHeater { uint8_t on; };
#endif

/*{ apid: "HEATER_APID", type: 8, subtype: 1, prefix: "HTR", base_par_index: "0A",
    cvs: ["ACC", "EXE"], desc: "Set heater power" }*/
struct SetHeater {
    TcHead hdr;
    uint8_t heater;      /*{ min: 0, max: 3, desc: "Heater index" }*/
    uint16_t power;      /*{ calib: "CAL_PWR", verify: "value <= 40" }*/
    uint8_t spare : 8;
};
"#;

fn command_config() -> ExtractConfig {
    let mut macros = MacroConfig::new();
    macros.undefine("LEGACY_HEATERS");
    ExtractConfig::default()
        .with_macros(macros)
        .with_root("SetHeater", PacketKind::Tc)
}

#[test]
fn test_command_end_to_end() {
    let extraction = extract(command_config(), &[("heater.h", COMMAND_SET)]);
    assert!(!extraction.diagnostics.has_errors(), "{:?}", extraction.diagnostics);

    let packet = extraction.packet("SetHeater").unwrap();
    assert_eq!(packet.metadata.description.as_deref(), Some("Set heater power"));
    assert_eq!(packet.identification.apid.as_ref().unwrap().value, Some(0x65));
    assert_eq!(packet.stages, ["ACC", "EXE"]);
    assert_eq!(packet.declared_bits, Some(64));
    assert_eq!(packet.computed_bits, Some(64));

    let names: Vec<_> = packet.parameters().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["HTRA", "HTRB"]);

    let heater = packet.field("HTRA").unwrap();
    assert_eq!(heater.type_code, Some(TypeCode::new(3, 4)));
    assert_eq!(heater.range.as_ref().unwrap().max, Some(3.0));
    assert_eq!(heater.metadata.description.as_deref(), Some("Heater index"));

    let power = packet.field("power").unwrap();
    assert_eq!(power.calibration.as_deref(), Some("CAL_PWR"));
    assert_eq!(power.verification.len(), 1);
    assert_eq!(power.metadata.nature, "R");

    let curve = extraction.calibration("CAL_PWR").unwrap();
    assert_eq!(curve.name, "POWER");
    assert_eq!(curve.unit.as_deref(), Some("W"));
    assert_eq!(extraction.stages.len(), 2);
    assert!(extraction.table.symbol("LegacyHeater").is_none());
    assert!(packet.fields.last().unwrap().spare);
}

#[test]
fn test_extraction_serializes_to_json() {
    let extraction = extract(command_config(), &[("heater.h", COMMAND_SET)]);
    let json = extraction.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["packets"][0]["name"], "SetHeater");
    assert_eq!(value["packets"][0]["kind"], "tc");
    assert!(value.get("table").is_none());
}

#[test]
fn test_telemetry_from_files_on_disk() {
    let dir = std::env::temp_dir().join(format!("pus_mib_disk_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let head = dir.join("head.h");
    let report = dir.join("report.h");
    std::fs::write(&head, "struct TmHead { uint16_t apid; uint8_t service; uint8_t subtype; };\n").unwrap();
    std::fs::write(
        &report,
        "/*{ apid: 300, service: 3, sub: 25, spid: 3001 }*/\n\
         struct Hk {\n\
             TmHead head;\n\
             uint8_t sid;      /*{ sid: true, const_value: 1 }*/\n\
             uint8_t count;    // cdf: count\n\
             int16_t temps[count];\n\
         };\n",
    )
    .unwrap();

    let config = ExtractConfig::default().with_root("Hk", PacketKind::Tm);
    let extraction = MibExtractor::new(config)
        .extract_paths(&[report, head, dir.join("absent.h")])
        .unwrap();
    std::fs::remove_dir_all(&dir).ok();

    assert_eq!(extraction.diagnostics.count(DefectKind::Io), 1);
    let packet = extraction.packet("Hk").unwrap();
    assert_eq!(packet.metadata.spid, Some(3001));
    assert_eq!(packet.identification.service_type.as_ref().unwrap().value, Some(3));
    let sid = packet.identification.structure_id.as_ref().unwrap();
    assert_eq!(sid.pi1.as_ref().unwrap().offset, 4);
    assert_eq!(sid.value, Some(1));

    let temps = packet.field("temps").unwrap();
    assert!(temps.variable);
    assert_eq!(temps.type_code, Some(TypeCode::new(7, 0)));
    assert!(packet.variable);
}

#[test]
fn test_oversized_array_reported_and_run_continues() {
    let extraction = extract(
        ExtractConfig::default()
            .with_root("Dump", PacketKind::Tm)
            .with_root("Small", PacketKind::Tm),
        &[(
            "dump.h",
            "struct TmHead { uint16_t apid; uint8_t service; uint8_t subtype; };\n\
             struct Dump { TmHead head; uint64_t blob[0x400000000000000]; uint8_t after; };\n\
             struct Small { TmHead head; uint8_t a; };\n",
        )],
    );

    let mapping: Vec<_> = extraction
        .diagnostics
        .of_kind(DefectKind::Mapping)
        .filter(|d| d.severity != pus_mib::ErrorSeverity::Warning)
        .collect();
    assert_eq!(mapping.len(), 1, "{:?}", extraction.diagnostics);
    assert!(mapping[0].error.message().contains("blob"));

    let dump = extraction.packet("Dump").unwrap();
    let blob = dump.field("blob").unwrap();
    assert_eq!(blob.total_bits(), None);
    assert_eq!(blob.type_code, None);
    assert_eq!(dump.field("after").unwrap().position, None);
    assert_eq!(dump.computed_bits, None);
    assert_eq!(dump.declared_bits, None);

    assert_eq!(extraction.packet("Small").unwrap().computed_bits, Some(40));
}
