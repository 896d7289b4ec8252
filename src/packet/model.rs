use super::ptc::{Category, TypeCode};
use crate::calibration::VerificationRule;
use crate::error::Location;
use crate::linker::Count;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Packet direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketKind {
    /// Telecommand, ground to spacecraft
    Tc,
    /// Telemetry, spacecraft to ground
    Tm,
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketKind::Tc => write!(f, "TC"),
            PacketKind::Tm => write!(f, "TM"),
        }
    }
}

/// A TC or TM packet recovered from one root struct
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Packet {
    /// Root struct name
    pub name: String,
    pub kind: PacketKind,
    pub identification: Identification,
    /// Flattened fields of the packet header
    pub header: Vec<Field>,
    /// Flattened body fields in layout order
    pub fields: Vec<Field>,
    pub groups: Vec<RepetitionGroup>,
    /// Length from the root's `length`/`length_bits` tags or its layout
    pub declared_bits: Option<u64>,
    /// Sum of field widths, counted groups once
    pub computed_bits: Option<u64>,
    /// Some part of the packet has run-time length
    pub variable: bool,
    pub metadata: PacketMetadata,
    /// Verification stage ids (telecommands only)
    pub stages: Vec<String>,
    pub location: Location,
}

impl Packet {
    /// Body field by parameter name or dotted path
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.name == name || f.path == name)
    }

    /// Header field by dotted path
    pub fn header_field(&self, path: &str) -> Option<&Field> {
        self.header.iter().find(|f| f.path == path)
    }

    /// Body fields that are parameters, spares excluded
    pub fn parameters(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| !f.spare)
    }

    /// Header then body
    pub fn all_fields(&self) -> impl Iterator<Item = &Field> {
        self.header.iter().chain(self.fields.iter())
    }

    pub fn group(&self, name: &str) -> Option<&RepetitionGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Declared length in whole bytes
    pub fn length_bytes(&self) -> Option<u64> {
        self.declared_bits.map(|bits| bits.div_ceil(8))
    }
}

/// Descriptive data of a packet
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PacketMetadata {
    pub description: Option<String>,
    /// Name in the MIB (CCF_CNAME, TPCF_NAME)
    pub text_id: Option<String>,
    /// Telemetry packet id (PID_SPID)
    pub spid: Option<i64>,
    pub mnemonic: Option<String>,
}

/// A header field playing an identification role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdField {
    /// Dotted path of the header field, if one was found
    pub field: Option<String>,
    /// Value from the root's tags
    pub value: Option<i64>,
}

/// One part of a telemetry structure id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PiField {
    /// Body field path; `None` for a `PI2` declared on the root
    pub field: Option<String>,
    /// Byte offset from the packet start
    pub offset: u64,
    /// Width in bits
    pub width: u64,
    pub value: Option<i64>,
}

/// TM additional identification (PI1, PI2)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StructureId {
    pub pi1: Option<PiField>,
    pub pi2: Option<PiField>,
    /// PI1 and PI2 values concatenated by width
    pub value: Option<i64>,
}

/// Identification of a packet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Identification {
    pub apid: Option<IdField>,
    /// Service type
    pub service_type: Option<IdField>,
    pub service_subtype: Option<IdField>,
    pub source: Option<IdField>,
    pub destination: Option<IdField>,
    pub structure_id: Option<StructureId>,
}

/// TC parameter range check (PRF/PRV)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeCheck {
    pub id: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Descriptive data of a field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldMetadata {
    pub description: Option<String>,
    pub unit: Option<String>,
    pub mnemonic: Option<String>,
    /// PCF_NATUR
    pub nature: String,
    pub default: Option<Value>,
    pub display: Option<String>,
    /// Fixed value of an identification field
    pub const_value: Option<i64>,
}

impl Default for FieldMetadata {
    fn default() -> Self {
        FieldMetadata {
            description: None,
            unit: None,
            mnemonic: None,
            nature: "R".to_string(),
            default: None,
            display: None,
            const_value: None,
        }
    }
}

/// A leaf of the flattened packet layout
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    /// Parameter name: `prefix` + index, or the dotted path
    pub name: String,
    /// Dotted path from the root
    pub path: String,
    /// C type as written after resolution
    pub c_type: String,
    /// Width of one element in bits
    pub bit_width: Option<u64>,
    pub count: Count,
    /// Bit offset from the packet start; unknown after variable content
    pub position: Option<u64>,
    /// `None` when the type has no PTC/PFC mapping
    pub type_code: Option<TypeCode>,
    pub category: Category,
    /// Fixed area, not a parameter
    pub spare: bool,
    /// Length or presence depends on run-time data
    pub variable: bool,
    /// Innermost repetition group, by index into `Packet::groups`
    pub group: Option<usize>,
    pub metadata: FieldMetadata,
    pub range: Option<RangeCheck>,
    /// Identifier of the attached calibration
    pub calibration: Option<String>,
    pub verification: Vec<VerificationRule>,
    /// Part of the telemetry structure id (`sid` tag)
    pub sid: bool,
    pub location: Location,
}

impl Field {
    /// Bits the field occupies; variable arrays count one element
    ///
    /// `None` when the width is unknown or overflows.
    pub fn total_bits(&self) -> Option<u64> {
        let width = self.bit_width?;
        match &self.count {
            Count::Scalar | Count::Dynamic(_) | Count::Flexible => Some(width),
            Count::Fixed(n) => width.checked_mul(*n),
            Count::Unknown(_) => None,
        }
    }
}

/// Repeated struct array, recorded once
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepetitionGroup {
    /// Dotted path of the array member
    pub name: String,
    /// Field holding the repetition count
    pub counter: String,
    /// The counter name was generated, no such field exists
    pub synthetic: bool,
    /// Compile-time repetitions
    pub repetitions: Option<u64>,
    /// Counted at run time; accounted once
    pub variable: bool,
    /// Paths of the fields in one repetition
    pub fields: Vec<String>,
    /// Enclosing group
    pub parent: Option<usize>,
    /// Width of one repetition
    pub element_bits: Option<u64>,
}
