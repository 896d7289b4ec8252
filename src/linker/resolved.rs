//! Fully expanded view of a struct, every type name resolved

use crate::error::Location;
use crate::lexer::Tags;
use crate::parser::Primitive;
use serde::Serialize;

/// A struct with its member types expanded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedStruct {
    /// Struct name, or the member name for an anonymous nested struct
    pub name: String,
    pub packed: bool,
    pub members: Vec<ResolvedMember>,
    pub tags: Tags,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedMember {
    pub name: String,
    pub ty: ResolvedType,
    pub count: Count,
    /// Evaluated bit-field width
    pub bit_width: Option<u32>,
    pub tags: Tags,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ResolvedType {
    Primitive(Primitive),
    Struct(Box<ResolvedStruct>),
    Enum(ResolvedEnum),
    /// Type name nobody defines, or a struct containing itself
    Unresolved(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedEnum {
    pub name: String,
    pub entries: Vec<ResolvedEntry>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedEntry {
    pub name: String,
    pub value: i64,
    pub tags: Tags,
}

/// Array multiplicity of a member
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Count {
    /// Not an array
    Scalar,
    /// Compile-time element count (product of all dimensions)
    Fixed(u64),
    /// Element count held in the named preceding field
    Dynamic(String),
    /// `x[]`: length known only at run time
    Flexible,
    /// Dimension that could not be evaluated
    Unknown(String),
}

impl Count {
    /// Element count when known at compile time
    pub fn fixed(&self) -> Option<u64> {
        match self {
            Count::Scalar => Some(1),
            Count::Fixed(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        !matches!(self, Count::Scalar)
    }

    /// Length depends on run-time data
    pub fn is_variable(&self) -> bool {
        matches!(self, Count::Dynamic(_) | Count::Flexible)
    }
}

impl ResolvedType {
    /// Width of one element in bits; `None` for unresolved or variable types
    pub fn element_bits(&self) -> Option<u64> {
        match self {
            ResolvedType::Primitive(p) => Some(u64::from(p.bits())),
            ResolvedType::Enum(_) => Some(32),
            ResolvedType::Struct(inner) => inner.bit_size(),
            ResolvedType::Unresolved(_) => None,
        }
    }

    /// Alignment in bytes under the natural C layout
    fn alignment(&self) -> u64 {
        match self {
            ResolvedType::Primitive(p) => u64::from(p.bits() / 8).max(1),
            ResolvedType::Enum(_) => 4,
            ResolvedType::Struct(inner) => inner.alignment(),
            ResolvedType::Unresolved(_) => 1,
        }
    }
}

impl ResolvedMember {
    /// Width in bits of the whole member; `None` when it varies or is unknown
    pub fn bit_size(&self) -> Option<u64> {
        let element = match self.bit_width {
            Some(width) => u64::from(width),
            None => self.ty.element_bits()?,
        };
        element.checked_mul(self.count.fixed()?)
    }

    pub fn struct_type(&self) -> Option<&ResolvedStruct> {
        match &self.ty {
            ResolvedType::Struct(inner) => Some(inner),
            _ => None,
        }
    }
}

impl ResolvedStruct {
    /// Contiguous layout size in bits; `None` if any member varies or
    /// the total overflows
    pub fn bit_size(&self) -> Option<u64> {
        self.members
            .iter()
            .try_fold(0u64, |total, m| total.checked_add(m.bit_size()?))
    }

    pub fn member(&self, name: &str) -> Option<&ResolvedMember> {
        self.members.iter().find(|m| m.name == name)
    }

    fn alignment(&self) -> u64 {
        if self.packed {
            return 1;
        }
        self.members
            .iter()
            .map(|m| m.ty.alignment())
            .max()
            .unwrap_or(1)
    }

    /// True if the natural (unpacked) C layout would insert padding
    /// anywhere in this struct or a nested unpacked one
    pub fn needs_padding(&self) -> bool {
        if self.packed {
            return false;
        }
        let mut offset_bits = 0u64;
        let mut padded = false;
        for member in &self.members {
            if let Some(width) = member.bit_width {
                offset_bits = offset_bits.saturating_add(u64::from(width));
                continue;
            }
            let offset = offset_bits.saturating_add(7) / 8;
            let align = member.ty.alignment();
            if offset % align != 0 || offset_bits % 8 != 0 {
                padded = true;
            }
            if let ResolvedType::Struct(inner) = &member.ty {
                padded |= inner.needs_padding();
            }
            let size = member.bit_size().unwrap_or(0);
            offset_bits = offset.saturating_mul(8).saturating_add(size);
        }
        let end = offset_bits.saturating_add(7) / 8;
        padded || offset_bits % 8 != 0 || end % self.alignment() != 0
    }

    /// Counter field of the repetition group at member `index`
    ///
    /// In order: the member's `counter`/`count` tag, a dimension naming a
    /// preceding field, a field tagged `cdf: count` or `vpd: count` that
    /// opens the run of `cdf`-tagged members directly before the group.
    /// A counter already bound to an earlier group in that run is not
    /// reused.
    pub fn group_counter(&self, index: usize) -> Option<String> {
        let member = self.members.get(index)?;
        if let Some(name) = member.tags.text_any(&["counter", "count"]) {
            return Some(name);
        }
        if let Count::Dynamic(name) = &member.count {
            return Some(name.clone());
        }
        let mut between = Vec::new();
        for (position, candidate) in self.members[..index].iter().enumerate().rev() {
            if is_counter(candidate) {
                let bound = between
                    .iter()
                    .any(|&k| self.group_counter(k).as_deref() == Some(candidate.name.as_str()));
                return (!bound).then(|| candidate.name.clone());
            }
            if !candidate.tags.contains("cdf") {
                return None;
            }
            if is_group(candidate) {
                between.push(position);
            }
        }
        None
    }
}

fn is_counter(member: &ResolvedMember) -> bool {
    member.tags.text("cdf").as_deref() == Some("count") || member.tags.text("vpd").as_deref() == Some("count")
}

/// Struct array member, laid out as a repetition group
fn is_group(member: &ResolvedMember) -> bool {
    member.struct_type().is_some() && member.count.is_array()
}
