//! Parameter type and format codes (ECSS-E-ST-70-41, SCOS-2000)

use crate::linker::{Count, ResolvedType};
use crate::parser::Primitive;
use serde::Serialize;
use std::fmt;

/// Widths of PTC 3 (unsigned) and PTC 4 (signed), indexed by PFC
const INTEGER_WIDTHS: [u64; 17] = [4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 24, 32, 48, 64];

/// Coarse/fine octet counts of PTC 9 (CUC time), indexed by PFC
const CUC_FORMATS: [(u8, u8); 18] = [
    (u8::MAX, u8::MAX),
    (0, 6),
    (0, 8),
    (1, 0),
    (1, 1),
    (1, 2),
    (1, 3),
    (2, 0),
    (2, 1),
    (2, 3),
    (3, 0),
    (3, 1),
    (3, 2),
    (3, 3),
    (4, 0),
    (4, 1),
    (4, 2),
    (4, 3),
];

/// A (PTC, PFC) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TypeCode {
    pub ptc: u8,
    pub pfc: u32,
}

impl TypeCode {
    pub fn new(ptc: u8, pfc: u32) -> Self {
        TypeCode { ptc, pfc }
    }

    /// PCF category implied by the type code
    pub fn category(&self) -> Category {
        match self.ptc {
            2 | 3 | 6 | 7 | 9 | 10 => Category::Numeric,
            8 => Category::Text,
            _ => Category::Status,
        }
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.ptc, self.pfc)
    }
}

/// PCF_CATEG
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    #[serde(rename = "N")]
    Numeric,
    #[serde(rename = "T")]
    Text,
    #[serde(rename = "S")]
    Status,
}

/// Type code of a field
///
/// `width` is the element width in bits (the bit-field width when there is
/// one) and `type_tag` the field's `type` comment tag. Returns `None` for
/// anything the table does not cover.
pub fn type_code(ty: &ResolvedType, width: u64, count: &Count, type_tag: Option<&str>) -> Option<TypeCode> {
    if let Some(tag) = type_tag {
        if let Some(pfc) = cuc_format(tag) {
            return Some(TypeCode::new(9, pfc));
        }
        if tag.trim().to_ascii_uppercase().starts_with("CUCTIME") {
            return None;
        }
    }

    let primitive = match ty {
        ResolvedType::Primitive(p) => Some(*p),
        ResolvedType::Enum(_) => None,
        ResolvedType::Struct(_) | ResolvedType::Unresolved(_) => return None,
    };
    if primitive == Some(Primitive::Pointer) {
        return None;
    }

    if count.is_array() {
        let ptc = if primitive == Some(Primitive::Char) { 8 } else { 7 };
        let pfc = match count.fixed() {
            Some(n) => u32::try_from(width.checked_mul(n)? / 8).ok()?,
            None => 0,
        };
        return Some(TypeCode::new(ptc, pfc));
    }

    let Some(primitive) = primitive else {
        return (1..=32).contains(&width).then(|| TypeCode::new(2, width as u32));
    };
    match primitive {
        Primitive::F32 => Some(TypeCode::new(5, 1)),
        Primitive::F64 => Some(TypeCode::new(5, 2)),
        p if p.is_signed() => integer_format(width).map(|pfc| TypeCode::new(4, pfc)),
        _ => match width {
            1 => Some(TypeCode::new(1, 0)),
            2 | 3 => Some(TypeCode::new(2, width as u32)),
            _ => integer_format(width).map(|pfc| TypeCode::new(3, pfc)),
        },
    }
}

fn integer_format(width: u64) -> Option<u32> {
    INTEGER_WIDTHS.iter().position(|w| *w == width).map(|i| i as u32)
}

/// PFC of a `CUCTIME<c>.<f>` or `CUCTIME<c><f>` tag
pub fn cuc_format(tag: &str) -> Option<u32> {
    let upper = tag.trim().to_ascii_uppercase();
    let digits: Vec<u8> = upper
        .strip_prefix("CUCTIME")?
        .chars()
        .filter(|c| *c != '.')
        .map(|c| c.to_digit(10).map(|d| d as u8))
        .collect::<Option<_>>()?;
    let [coarse, fine] = digits.as_slice() else {
        return None;
    };
    CUC_FORMATS
        .iter()
        .position(|f| *f == (*coarse, *fine))
        .map(|i| i as u32)
}
