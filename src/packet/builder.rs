//! Packet construction over the linked table
//!
//! One root struct becomes one [`Packet`]. The root is expanded by the
//! linker, its header member recognised, every other member flattened into
//! leaf fields with positions and type codes, struct arrays turned into
//! repetition groups, and comment metadata applied. Problems are recorded
//! per field and construction carries on.

use super::model::{
    Field, FieldMetadata, IdField, Identification, Packet, PacketKind, PacketMetadata, PiField,
    RangeCheck, RepetitionGroup, StructureId,
};
use super::ptc::{type_code, Category};
use crate::calibration::{textual_from_enum, CalibrationCatalog, CalibrationCurve, VerificationRule, REFERENCE_TAGS};
use crate::config::{HeaderNames, PacketRoot};
use crate::error::{Diagnostic, Diagnostics, Error, Location};
use crate::lexer::{value_int, value_text, Tags};
use crate::linker::{Count, LinkedTable, ResolvedMember, ResolvedStruct, ResolvedType};
use serde_json::Value;
use sha2::{Digest, Sha256};

const APID_NAMES: [&str; 3] = ["apid", "appid", "application_id"];
const TYPE_NAMES: [&str; 3] = ["type", "servicetype", "service"];
const SUBTYPE_NAMES: [&str; 3] = ["subtype", "stype", "servicesubtype"];
const SOURCE_NAMES: [&str; 3] = ["source", "sourceid", "src"];
const DESTINATION_NAMES: [&str; 3] = ["dest", "destid", "destination"];

/// Result of building one root
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// `None` only when the root struct does not exist
    pub packet: Option<Packet>,
    /// Curves attached to the packet's fields
    pub calibrations: Vec<CalibrationCurve>,
    pub diagnostics: Diagnostics,
}

/// Builds packets from a linked table; shared read-only across roots
pub struct PacketBuilder<'a> {
    table: &'a LinkedTable,
    catalog: &'a CalibrationCatalog,
    headers: &'a HeaderNames,
}

impl<'a> PacketBuilder<'a> {
    pub fn new(table: &'a LinkedTable, catalog: &'a CalibrationCatalog, headers: &'a HeaderNames) -> Self {
        PacketBuilder {
            table,
            catalog,
            headers,
        }
    }

    /// Construct the packet for `root`
    pub fn build(&self, root: &PacketRoot) -> BuildOutput {
        let mut diagnostics = Diagnostics::new();
        let Some(resolved) = self.table.expand(&root.name) else {
            diagnostics.push(Diagnostic::new(Error::mapping(format!(
                "packet root `{}` is not a defined struct",
                root.name
            ))));
            return BuildOutput {
                packet: None,
                calibrations: Vec::new(),
                diagnostics,
            };
        };

        let mut layout = Layout::default();
        let header_index = resolved
            .members
            .iter()
            .position(|m| self.is_header(m, root.kind));
        if header_index.is_none() {
            layout.diagnostics.push(
                Diagnostic::at(
                    Error::mapping(format!("packet `{}` has no recognisable {} header", root.name, root.kind)),
                    resolved.location.clone(),
                )
                .warning(),
            );
        }
        let computed_bits = layout.flatten(&resolved, "", None, false, header_index);
        diagnostics.merge(std::mem::take(&mut layout.diagnostics));

        if !resolved.packed && resolved.needs_padding() {
            diagnostics.push(
                Diagnostic::at(
                    Error::mapping(format!(
                        "struct `{}` is not packed and its C layout has padding; fields are laid out contiguously",
                        root.name
                    )),
                    resolved.location.clone(),
                )
                .warning(),
            );
        }

        let Layout {
            header,
            mut fields,
            groups,
            ..
        } = layout;
        let variable = fields.iter().any(|f| f.variable) || groups.iter().any(|g| g.variable);
        let tags = &resolved.tags;

        self.name_parameters(tags, &mut fields, &mut diagnostics);

        let mut calibrations = Vec::new();
        for field in fields.iter_mut().filter(|f| !f.spare) {
            if let Some(curve) = self.attach_calibration(field, root.kind, &resolved, &mut diagnostics) {
                calibrations.push(curve);
            }
        }

        let identification = self.identify(root.kind, tags, &header, &fields, &mut diagnostics, &resolved.location);
        let declared_bits = self.declared_length(tags, &resolved, variable, &mut diagnostics);
        match (declared_bits, computed_bits) {
            (Some(declared), Some(computed)) if declared != computed => diagnostics.push(Diagnostic::at(
                Error::mapping(format!(
                    "fields of `{}` add up to {} bits but its length is {} bits",
                    root.name, computed, declared
                )),
                resolved.location.clone(),
            )),
            (Some(declared), None) => diagnostics.push(Diagnostic::at(
                Error::mapping(format!(
                    "length of `{}` ({} bits) cannot be checked: a field has unknown width",
                    root.name, declared
                )),
                resolved.location.clone(),
            )),
            _ => {}
        }

        let stages = match root.kind {
            PacketKind::Tc => {
                let (stages, errors) = self.catalog.stages_for(tags);
                for error in errors {
                    diagnostics.push(Diagnostic::at(error, resolved.location.clone()));
                }
                stages
            }
            PacketKind::Tm => Vec::new(),
        };

        let packet = Packet {
            name: root.name.clone(),
            kind: root.kind,
            identification,
            header,
            fields,
            groups,
            declared_bits,
            computed_bits,
            variable,
            metadata: PacketMetadata {
                description: tags.text("desc"),
                text_id: tags.text("text_id"),
                spid: tags.get("spid").and_then(|v| self.int_value(v)),
                mnemonic: tags.text_any(&["Mnemonic", "mnemonic"]),
            },
            stages,
            location: resolved.location.clone(),
        };

        tracing::info!(
            root = %root.name,
            kind = %root.kind,
            fields = packet.fields.len(),
            groups = packet.groups.len(),
            bits = ?packet.computed_bits,
            "built packet"
        );
        BuildOutput {
            packet: Some(packet),
            calibrations,
            diagnostics,
        }
    }

    fn is_header(&self, member: &ResolvedMember, kind: PacketKind) -> bool {
        let Some(inner) = member.struct_type() else {
            return false;
        };
        if member.count.is_array() {
            return false;
        }
        self.headers.contains(kind, &inner.name)
            || matches!(member.name.to_ascii_lowercase().as_str(), "hdr" | "header")
            || inner.name.ends_with("Header")
            || inner.name.ends_with("Head")
    }

    /// `prefix` + hex(`base_par_index` + i) for the i-th parameter
    fn name_parameters(&self, tags: &Tags, fields: &mut [Field], diagnostics: &mut Diagnostics) {
        let Some(prefix) = tags.text("prefix") else {
            return;
        };
        let base = tags
            .get("base_par_index")
            .and_then(value_text)
            .and_then(|text| {
                let text = text.trim();
                let digits = text
                    .strip_prefix("0x")
                    .or_else(|| text.strip_prefix("0X"))
                    .unwrap_or(text);
                i64::from_str_radix(digits, 16).ok()
            })
            .unwrap_or(0);
        for (i, field) in fields.iter_mut().filter(|f| !f.spare).enumerate() {
            let Some(index) = i64::try_from(i).ok().and_then(|i| base.checked_add(i)) else {
                diagnostics.push(Diagnostic::at(
                    Error::mapping(format!(
                        "parameter index of `{}` overflows from base_par_index {:X}",
                        field.path, base
                    )),
                    field.location.clone(),
                ));
                return;
            };
            field.name = format!("{}{:X}", prefix, index);
        }
    }

    /// Calibration, verification and range check of one parameter
    fn attach_calibration(
        &self,
        field: &mut Field,
        kind: PacketKind,
        root: &ResolvedStruct,
        diagnostics: &mut Diagnostics,
    ) -> Option<CalibrationCurve> {
        let member = find_member(root, &field.path)?;
        let tags = &member.tags;
        let leaf = field.path.rsplit('.').next().unwrap_or(&field.path).to_string();

        for rule in VerificationRule::from_tags(tags, &leaf) {
            match rule {
                Ok(rule) => field.verification.push(rule),
                Err(message) => diagnostics.push(Diagnostic::at(
                    Error::calibration(format!("verification of `{}`: {}", field.path, message)),
                    field.location.clone(),
                )),
            }
        }

        if kind == PacketKind::Tc && (tags.contains("min") || tags.contains("max")) {
            field.range = Some(RangeCheck {
                id: range_id(&field.name),
                min: tags.float("min"),
                max: tags.float("max"),
            });
        }

        let curve = match (tags.text_any(&REFERENCE_TAGS), &member.ty) {
            (Some(reference), _) => match self.catalog.resolve(&reference, self.table) {
                Ok(curve) => curve,
                Err(error) => {
                    diagnostics.push(Diagnostic::at(error, field.location.clone()));
                    return None;
                }
            },
            (None, ResolvedType::Enum(resolved)) => textual_from_enum(resolved),
            (None, _) => return None,
        };

        if let Err(reason) = curve.invertibility() {
            let diagnostic = Diagnostic::at(
                Error::calibration(format!(
                    "calibration `{}` of `{}` has no decalibration: {}",
                    curve.ident, field.path, reason
                )),
                field.location.clone(),
            );
            diagnostics.push(match kind {
                PacketKind::Tc => diagnostic,
                PacketKind::Tm => diagnostic.warning(),
            });
        }
        if curve.is_textual() {
            field.category = Category::Status;
        }
        field.calibration = Some(curve.ident.clone());
        Some(curve)
    }

    fn identify(
        &self,
        kind: PacketKind,
        tags: &Tags,
        header: &[Field],
        fields: &[Field],
        diagnostics: &mut Diagnostics,
        location: &Location,
    ) -> Identification {
        if header.is_empty() {
            return Identification::default();
        }
        let mut identification = Identification {
            apid: self.role(&APID_NAMES, &["apid"], tags, header, diagnostics, location),
            service_type: self.role(&TYPE_NAMES, &["service", "type"], tags, header, diagnostics, location),
            service_subtype: self.role(&SUBTYPE_NAMES, &["sub", "subtype"], tags, header, diagnostics, location),
            source: self.role(&SOURCE_NAMES, &["source"], tags, header, diagnostics, location),
            destination: self.role(&DESTINATION_NAMES, &["dest"], tags, header, diagnostics, location),
            structure_id: None,
        };

        if kind == PacketKind::Tm {
            identification.structure_id = structure_id(tags, fields);
        }
        identification
    }

    /// Header field and value of one identification role
    ///
    /// The field is matched on its leaf name; the value comes from the
    /// first of the root's `keys`, else from the field's `const_value`.
    fn role(
        &self,
        names: &[&str],
        keys: &[&str],
        tags: &Tags,
        header: &[Field],
        diagnostics: &mut Diagnostics,
        location: &Location,
    ) -> Option<IdField> {
        let field = header.iter().find(|f| {
            let leaf = f.path.rsplit('.').next().unwrap_or(&f.path).to_ascii_lowercase();
            names.contains(&leaf.as_str())
        });
        let value = match tags.get_any(keys) {
            Some(value) => {
                let evaluated = self.int_value(value);
                if evaluated.is_none() {
                    diagnostics.push(Diagnostic::at(
                        Error::mapping(format!("cannot evaluate identification value {}", value)),
                        location.clone(),
                    ));
                }
                evaluated
            }
            None => field.and_then(|f| f.metadata.const_value),
        };
        if field.is_none() && value.is_none() {
            return None;
        }
        Some(IdField {
            field: field.map(|f| f.path.clone()),
            value,
        })
    }

    fn declared_length(
        &self,
        tags: &Tags,
        root: &ResolvedStruct,
        variable: bool,
        diagnostics: &mut Diagnostics,
    ) -> Option<u64> {
        let tagged = match (tags.get("length"), tags.get("length_bits")) {
            (Some(bytes), _) => Some(self.int_value(bytes).and_then(|b| b.checked_mul(8))),
            (None, Some(bits)) => Some(self.int_value(bits)),
            (None, None) => None,
        };
        match tagged {
            Some(Some(bits)) if bits >= 0 => Some(bits as u64),
            Some(_) => {
                diagnostics.push(Diagnostic::at(
                    Error::mapping(format!("invalid length tag on `{}`", root.name)),
                    root.location.clone(),
                ));
                None
            }
            None if variable => None,
            None => root.bit_size(),
        }
    }

    /// Integer from a tag value, evaluating names in the constant table
    fn int_value(&self, value: &Value) -> Option<i64> {
        value_int(value).or_else(|| {
            value_text(value).and_then(|text| self.table.evaluate(&text).ok())
        })
    }
}

/// Member of `root` at a dotted path
fn find_member<'r>(root: &'r ResolvedStruct, path: &str) -> Option<&'r ResolvedMember> {
    let mut current = root;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let member = current.member(part)?;
        if parts.peek().is_none() {
            return Some(member);
        }
        current = member.struct_type()?;
    }
    None
}

/// PI1/PI2 from `sid` fields, or PI2 from the root's `PI2` tag
fn structure_id(tags: &Tags, fields: &[Field]) -> Option<StructureId> {
    let mut parts = fields.iter().filter(|f| f.sid).filter_map(|f| {
        Some(PiField {
            field: Some(f.path.clone()),
            offset: f.position? / 8,
            width: f.total_bits()?,
            value: f.metadata.const_value,
        })
    });
    let pi1 = parts.next();
    let mut pi2 = parts.next();

    if let Some(Value::Array(declared)) = tags.get("PI2") {
        if let [offset, width] = declared.as_slice() {
            if let (Some(offset), Some(width)) = (value_int(offset), value_int(width)) {
                pi2 = Some(PiField {
                    field: None,
                    offset: offset.max(0) as u64,
                    width: width.max(0) as u64,
                    value: None,
                });
            }
        }
    }

    if pi1.is_none() && pi2.is_none() {
        return None;
    }
    let value = match (&pi1, &pi2) {
        (Some(first), Some(second)) => first
            .value
            .zip(second.value)
            .and_then(|(a, b)| Some(a.checked_shl(u32::try_from(second.width).ok()?)? | b)),
        (Some(first), None) => first.value,
        _ => None,
    };
    Some(StructureId { pi1, pi2, value })
}

/// `RAN` + seven hex digits of the parameter name's SHA-256
fn range_id(parameter: &str) -> String {
    let digest = hex::encode_upper(Sha256::digest(parameter.as_bytes()));
    format!("RAN{}", &digest[..7])
}

/// Counter name for a fixed repetition with no counting field
fn synthetic_counter(path: &str) -> String {
    let digest = hex::encode_upper(Sha256::digest(path.as_bytes()));
    format!("CNT{}", &digest[..7])
}

/// Flattening state of one packet
#[derive(Default)]
struct Layout {
    header: Vec<Field>,
    fields: Vec<Field>,
    groups: Vec<RepetitionGroup>,
    /// Bit offset of the next field; `None` once it depends on run-time data
    offset: Option<u64>,
    in_header: bool,
    diagnostics: Diagnostics,
}

impl Layout {
    /// Flatten `record`, returning the bits it contributes
    ///
    /// `header_index` marks the root member holding the packet header.
    fn flatten(
        &mut self,
        record: &ResolvedStruct,
        prefix: &str,
        group: Option<usize>,
        variable: bool,
        header_index: Option<usize>,
    ) -> Option<u64> {
        if prefix.is_empty() && group.is_none() {
            self.offset = Some(0);
        }
        let mut bits = Some(0u64);

        for (index, member) in record.members.iter().enumerate() {
            let path = if prefix.is_empty() {
                member.name.clone()
            } else {
                format!("{}.{}", prefix, member.name)
            };
            let is_header = prefix.is_empty() && header_index == Some(index);
            self.in_header = is_header || (self.in_header && !prefix.is_empty());

            let contribution = match (&member.ty, member.count.is_array()) {
                (ResolvedType::Struct(inner), true) => {
                    self.group(record, index, member, inner, &path, group, variable)
                }
                (ResolvedType::Struct(inner), false) => self.flatten(inner, &path, group, variable, None),
                _ => self.leaf(member, path, group, variable),
            };
            bits = bits.zip(contribution).and_then(|(a, b)| a.checked_add(b));

            if prefix.is_empty() {
                self.in_header = false;
            }
        }
        bits
    }

    fn group(
        &mut self,
        record: &ResolvedStruct,
        index: usize,
        member: &ResolvedMember,
        inner: &ResolvedStruct,
        path: &str,
        parent: Option<usize>,
        variable: bool,
    ) -> Option<u64> {
        let counter = record.group_counter(index);
        let (repetitions, mut counted) = match &member.count {
            Count::Fixed(n) => (Some(*n), counter.is_some()),
            Count::Dynamic(_) | Count::Flexible => (None, true),
            Count::Unknown(text) => {
                self.diagnostics.push(Diagnostic::at(
                    Error::mapping(format!("repetition count `{}` of `{}` cannot be evaluated", text, path)),
                    member.location.clone(),
                ));
                (None, true)
            }
            Count::Scalar => (Some(1), false),
        };
        if member.tags.contains("vpd") {
            counted = true;
        }

        let group_index = self.groups.len();
        self.groups.push(RepetitionGroup {
            name: path.to_string(),
            counter: counter.clone().unwrap_or_else(|| synthetic_counter(path)),
            synthetic: counter.is_none(),
            repetitions,
            variable: counted,
            fields: Vec::new(),
            parent,
            element_bits: None,
        });

        let start = self.offset;
        let element = self.flatten(inner, path, Some(group_index), variable || counted, None);
        self.groups[group_index].element_bits = element;

        let contribution = match (counted, element, repetitions) {
            (true, _, _) => element,
            (false, Some(e), Some(n)) => {
                let total = e.checked_mul(n);
                if total.is_none() {
                    self.overflow(path, member);
                }
                total
            }
            (false, _, _) => None,
        };
        self.offset = if counted { None } else { self.advance(start, contribution, path, member) };
        contribution
    }

    fn leaf(&mut self, member: &ResolvedMember, path: String, group: Option<usize>, variable: bool) -> Option<u64> {
        let tags = &member.tags;
        let width = member
            .bit_width
            .map(u64::from)
            .or_else(|| member.ty.element_bits());
        let spare = member.name.to_ascii_lowercase().starts_with("spare");

        let oversized = match (width, &member.count) {
            (Some(w), Count::Fixed(n)) => w.checked_mul(*n).is_none(),
            _ => false,
        };

        let type_code = width.and_then(|w| type_code(&member.ty, w, &member.count, tags.text("type").as_deref()));
        match (&member.ty, type_code) {
            (ResolvedType::Unresolved(name), _) => self.diagnostics.push(Diagnostic::at(
                Error::mapping(format!("field `{}` has unresolved type `{}`", path, name)),
                member.location.clone(),
            )),
            _ if oversized => self.overflow(&path, member),
            (ty, None) if !spare => self.diagnostics.push(Diagnostic::at(
                Error::mapping(format!("field `{}` of type `{}` has no PTC/PFC mapping", path, type_name(ty))),
                member.location.clone(),
            )),
            _ => {}
        }

        let field = Field {
            name: path.clone(),
            path: path.clone(),
            c_type: type_name(&member.ty),
            bit_width: width,
            count: member.count.clone(),
            position: self.offset,
            type_code,
            category: type_code.map_or(Category::Status, |t| t.category()),
            spare,
            variable: variable || member.count.is_variable() || tags.contains("vpd"),
            group,
            metadata: FieldMetadata {
                description: tags.text("desc"),
                unit: tags.text("unit"),
                mnemonic: tags.text_any(&["Mnemonic", "mnemonic"]),
                nature: tags.text("natur").unwrap_or_else(|| "R".to_string()),
                default: tags.get("default").cloned(),
                display: tags.text("display"),
                const_value: tags.int("const_value"),
            },
            range: None,
            calibration: None,
            verification: Vec::new(),
            sid: tags.flag("sid"),
            location: member.location.clone(),
        };
        let bits = field.total_bits();

        self.offset = if member.count.is_variable() {
            None
        } else {
            self.advance(self.offset, bits, &path, member)
        };
        if let Some(g) = group {
            self.groups[g].fields.push(path);
        }
        if self.in_header {
            self.header.push(field);
        } else {
            self.fields.push(field);
        }
        bits
    }

    /// Offset after `bits` more, reporting a position past the bit range
    fn advance(&mut self, offset: Option<u64>, bits: Option<u64>, path: &str, member: &ResolvedMember) -> Option<u64> {
        let (offset, bits) = offset.zip(bits)?;
        let next = offset.checked_add(bits);
        if next.is_none() {
            self.overflow(path, member);
        }
        next
    }

    fn overflow(&mut self, path: &str, member: &ResolvedMember) {
        self.diagnostics.push(Diagnostic::at(
            Error::mapping(format!("width of `{}` overflows the packet bit range", path)),
            member.location.clone(),
        ));
    }
}

fn type_name(ty: &ResolvedType) -> String {
    match ty {
        ResolvedType::Primitive(p) => p.c_name().to_string(),
        ResolvedType::Struct(inner) => format!("struct {}", inner.name),
        ResolvedType::Enum(inner) => format!("enum {}", inner.name),
        ResolvedType::Unresolved(name) => name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MacroConfig;
    use crate::error::{DefectKind, ErrorSeverity};
    use crate::linker::link;
    use crate::packet::TypeCode;
    use crate::parser::{parse_file, FileId, SourceFile};

    const HEADERS: &str = "struct TcHead { uint16_t apid; uint8_t type; uint8_t subtype; };\n\
                           struct TmHead { uint16_t apid; uint8_t service; uint8_t subtype; };\n";

    fn build(text: &str, root: &str, kind: PacketKind) -> BuildOutput {
        let macros = MacroConfig::new();
        let source = SourceFile::new("pkt.h", format!("{}{}", HEADERS, text));
        let (table, _) = link(vec![parse_file(FileId(0), &source, &macros)], &macros);
        let (catalog, _) = CalibrationCatalog::build(&table);
        let headers = HeaderNames::default();
        PacketBuilder::new(&table, &catalog, &headers).build(&PacketRoot::new(root, kind))
    }

    fn errors(output: &BuildOutput) -> Vec<&Diagnostic> {
        output
            .diagnostics
            .iter()
            .filter(|d| d.severity != ErrorSeverity::Warning)
            .collect()
    }

    #[test]
    fn test_header_and_body_split() {
        let output = build(
            "/*{ apid: 100, type: 17, subtype: 1 }*/\nstruct Cmd { TcHead hdr; uint16_t param1; };",
            "Cmd",
            PacketKind::Tc,
        );
        assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
        let packet = output.packet.unwrap();

        let header: Vec<_> = packet.header.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(header, ["hdr.apid", "hdr.type", "hdr.subtype"]);
        let body: Vec<_> = packet.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(body, ["param1"]);

        let param = packet.field("param1").unwrap();
        assert_eq!(param.position, Some(32));
        assert_eq!(param.type_code, Some(TypeCode::new(3, 12)));

        let apid = packet.identification.apid.unwrap();
        assert_eq!(apid.field.as_deref(), Some("hdr.apid"));
        assert_eq!(apid.value, Some(100));
        assert_eq!(packet.identification.service_type.unwrap().value, Some(17));
        assert_eq!(packet.declared_bits, Some(48));
        assert_eq!(packet.computed_bits, Some(48));
        assert!(!packet.variable);
    }

    #[test]
    fn test_telemetry_structure_id_and_dynamic_array() {
        let output = build(
            "/*{ apid: 200, service: 3, sub: 25, PI2: [6, 8] }*/\n\
             struct Hk {\n\
                 TmHead head;\n\
                 uint8_t sid; /*{ sid: true, const_value: 5 }*/\n\
                 uint8_t n;\n\
                 uint16_t samples[n];\n\
             };",
            "Hk",
            PacketKind::Tm,
        );
        assert!(errors(&output).is_empty(), "{:?}", output.diagnostics);
        let packet = output.packet.unwrap();

        assert_eq!(packet.identification.service_subtype.as_ref().unwrap().value, Some(25));
        let sid = packet.identification.structure_id.as_ref().unwrap();
        let pi1 = sid.pi1.as_ref().unwrap();
        assert_eq!((pi1.offset, pi1.width, pi1.value), (4, 8, Some(5)));
        let pi2 = sid.pi2.as_ref().unwrap();
        assert_eq!((pi2.offset, pi2.width), (6, 8));
        assert_eq!(sid.value, None);

        let samples = packet.field("samples").unwrap();
        assert!(samples.variable);
        assert_eq!(samples.position, Some(48));
        assert_eq!(samples.type_code, Some(TypeCode::new(7, 0)));
        assert!(packet.variable);
        assert_eq!(packet.declared_bits, None);
        assert_eq!(packet.computed_bits, Some(64));
        assert!(packet.stages.is_empty());
    }

    #[test]
    fn test_command_group_range_and_stages() {
        let output = build(
            "/*{ cvs_def: \"ACC\", cvs_type: \"A\", default: true }*/\n\
             /*{ cal_def: \"VOLT\", mcf: { a0: 0, a1: 0.5 } }*/\n\
             struct Entry { uint16_t id; uint32_t value; };\n\
             /*{ type: 8, subtype: 1, prefix: \"PAR\", base_par_index: \"10\" }*/\n\
             struct Load {\n\
                 TcHead hdr;\n\
                 uint8_t count; // cdf: count\n\
                 Entry entries[4];\n\
                 uint16_t level; /*{ min: 0, max: 100, calib: \"VOLT\" }*/\n\
             };",
            "Load",
            PacketKind::Tc,
        );
        assert!(errors(&output).is_empty(), "{:?}", output.diagnostics);
        let packet = output.packet.unwrap();

        let names: Vec<_> = packet.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["PAR10", "PAR11", "PAR12", "PAR13"]);
        let positions: Vec<_> = packet.fields.iter().map(|f| f.position).collect();
        assert_eq!(positions, [Some(32), Some(40), Some(56), None]);

        let group = packet.group("entries").unwrap();
        assert_eq!(group.counter, "count");
        assert!(!group.synthetic);
        assert!(group.variable);
        assert_eq!(group.repetitions, Some(4));
        assert_eq!(group.element_bits, Some(48));
        assert_eq!(group.fields, ["entries.id", "entries.value"]);

        let level = packet.field("level").unwrap();
        let range = level.range.as_ref().unwrap();
        assert!(range.id.starts_with("RAN") && range.id.len() == 10);
        assert_eq!((range.min, range.max), (Some(0.0), Some(100.0)));
        assert_eq!(level.calibration.as_deref(), Some("VOLT"));
        assert_eq!(output.calibrations.len(), 1);

        assert_eq!(packet.stages, ["ACC"]);
        assert_eq!(packet.identification.service_type.unwrap().value, Some(8));
        assert!(packet.variable);
        assert_eq!(packet.computed_bits, Some(104));
    }

    #[test]
    fn test_declared_length_mismatch() {
        let output = build(
            "/*{ length: 4 }*/\nstruct Small { TcHead hdr; uint8_t a; };",
            "Small",
            PacketKind::Tc,
        );
        assert_eq!(output.diagnostics.count(DefectKind::Mapping), 1);
        assert!(output.diagnostics.has_errors());
        let packet = output.packet.unwrap();
        assert_eq!(packet.declared_bits, Some(32));
        assert_eq!(packet.computed_bits, Some(40));
    }

    #[test]
    fn test_unmapped_width_and_missing_root() {
        let output = build(
            "struct Odd { uint32_t odd : 20; uint32_t spare_bits : 12; };",
            "Odd",
            PacketKind::Tm,
        );
        let errors = errors(&output);
        assert_eq!(errors.len(), 1, "{:?}", output.diagnostics);
        assert!(errors[0].error.message().contains("odd"));
        let packet = output.packet.unwrap();
        assert!(packet.field("spare_bits").unwrap().spare);
        assert_eq!(packet.parameters().count(), 1);

        let missing = build("", "Nope", PacketKind::Tc);
        assert!(missing.packet.is_none());
        assert_eq!(missing.diagnostics.count(DefectKind::Mapping), 1);
    }

    #[test]
    fn test_synthetic_counter_for_fixed_group() {
        let output = build(
            "struct Pair { uint8_t a; uint8_t b; };\nstruct Rep { TmHead head; Pair pairs[3]; };",
            "Rep",
            PacketKind::Tm,
        );
        let packet = output.packet.unwrap();
        let group = packet.group("pairs").unwrap();
        assert!(group.synthetic);
        assert!(!group.variable);
        assert!(group.counter.starts_with("CNT"));
        assert_eq!(packet.computed_bits, Some(32 + 3 * 16));
        assert_eq!(packet.declared_bits, Some(80));
        assert!(!packet.variable);
    }

    #[test]
    fn test_counter_not_shared_across_untagged_field() {
        let output = build(
            "struct A { uint8_t v; };\nstruct B { uint16_t w; };\n\
             struct Mixed {\n\
                 TmHead head;\n\
                 uint8_t n; // cdf: count\n\
                 A as[n];\n\
                 uint8_t gap;\n\
                 B bs[3];\n\
             };",
            "Mixed",
            PacketKind::Tm,
        );
        assert!(errors(&output).is_empty(), "{:?}", output.diagnostics);
        let packet = output.packet.unwrap();

        let first = packet.group("as").unwrap();
        assert_eq!(first.counter, "n");
        assert!(first.variable);

        let second = packet.group("bs").unwrap();
        assert!(second.synthetic);
        assert!(!second.variable);
        assert_eq!(second.repetitions, Some(3));
        assert_eq!(packet.computed_bits, Some(32 + 8 + 8 + 8 + 3 * 16));
    }

    #[test]
    fn test_parameter_index_overflow() {
        let output = build(
            "/*{ prefix: \"P\", base_par_index: \"7FFFFFFFFFFFFFFF\" }*/\n\
             struct Cmd { TcHead hdr; uint8_t a; uint8_t b; };",
            "Cmd",
            PacketKind::Tc,
        );
        let mapping: Vec<_> = output.diagnostics.of_kind(DefectKind::Mapping).collect();
        assert_eq!(mapping.len(), 1, "{:?}", output.diagnostics);
        assert!(mapping[0].error.message().contains("`b`"));
        let packet = output.packet.unwrap();
        let names: Vec<_> = packet.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["P7FFFFFFFFFFFFFFF", "b"]);
    }
}
