use crate::lexer::{Span, Tags};
use serde::Serialize;
use std::fmt;

/// Index of a file in the order it was handed to the extractor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FileId(pub usize);

/// Top-level declarations of one file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Structure {
    /// `struct Name { ... }` or `typedef struct { ... } Name`
    StructDef(StructDef),
    /// `struct Name;` or `struct Name var[N];`
    StructRef(StructRef),
    /// `enum Name { ... }` or `typedef enum { ... } Name`
    EnumDef(EnumDef),
    /// `enum Name var;`
    EnumRef(EnumRef),
    /// `extern type name[dim];`
    Extern(Extern),
    /// `#define NAME expr`
    Define(Define),
}

impl Structure {
    /// Declared name; `None` only for anonymous struct definitions
    pub fn name(&self) -> Option<&str> {
        match self {
            Structure::StructDef(s) => s.name.as_deref(),
            Structure::StructRef(r) => Some(&r.name),
            Structure::EnumDef(e) => Some(&e.name),
            Structure::EnumRef(r) => Some(&r.name),
            Structure::Extern(e) => Some(&e.name),
            Structure::Define(d) => Some(&d.name),
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Structure::StructDef(s) => s.span,
            Structure::StructRef(r) => r.span,
            Structure::EnumDef(e) => e.span,
            Structure::EnumRef(r) => r.span,
            Structure::Extern(e) => e.span,
            Structure::Define(d) => d.span,
        }
    }

    pub fn file(&self) -> FileId {
        match self {
            Structure::StructDef(s) => s.file,
            Structure::StructRef(r) => r.file,
            Structure::EnumDef(e) => e.file,
            Structure::EnumRef(r) => r.file,
            Structure::Extern(e) => e.file,
            Structure::Define(d) => d.file,
        }
    }

    /// Metadata of the comments attached to this declaration
    pub fn tags(&self) -> &Tags {
        match self {
            Structure::StructDef(s) => &s.tags,
            Structure::StructRef(r) => &r.tags,
            Structure::EnumDef(e) => &e.tags,
            Structure::EnumRef(r) => &r.tags,
            Structure::Extern(e) => &e.tags,
            Structure::Define(d) => &d.tags,
        }
    }

    pub(crate) fn tags_mut(&mut self) -> &mut Tags {
        match self {
            Structure::StructDef(s) => &mut s.tags,
            Structure::StructRef(r) => &mut r.tags,
            Structure::EnumDef(e) => &mut e.tags,
            Structure::EnumRef(r) => &mut r.tags,
            Structure::Extern(e) => &mut e.tags,
            Structure::Define(d) => &mut d.tags,
        }
    }
}

/// A struct body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructDef {
    pub name: Option<String>,
    /// Declared with a packed attribute
    pub packed: bool,
    pub members: Vec<Member>,
    /// Whole declaration
    pub span: Span,
    /// `{` through `}`
    pub body: Span,
    pub file: FileId,
    pub tags: Tags,
}

impl StructDef {
    /// Position-independent rendering of the body, used to compare
    /// duplicate definitions
    pub fn signature(&self) -> String {
        let mut out = String::new();
        if self.packed {
            out.push_str("packed ");
        }
        out.push('{');
        for member in &self.members {
            member.write_signature(&mut out);
        }
        out.push('}');
        out
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// One declarator inside a struct body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Member {
    pub name: String,
    pub ty: TypeSpec,
    /// Array dimensions, outermost first
    pub array: Vec<ConstExpr>,
    /// Bit-field width
    pub bit_width: Option<ConstExpr>,
    pub span: Span,
    pub tags: Tags,
}

impl Member {
    fn write_signature(&self, out: &mut String) {
        out.push_str(&self.ty.to_string());
        if let TypeSpec::Struct(def) = &self.ty {
            out.push_str(&def.signature());
        }
        if let TypeSpec::Enum(def) = &self.ty {
            out.push_str(&def.signature());
        }
        out.push(' ');
        out.push_str(&self.name);
        for dim in &self.array {
            out.push('[');
            out.push_str(&dim.text);
            out.push(']');
        }
        if let Some(width) = &self.bit_width {
            out.push(':');
            out.push_str(&width.text);
        }
        out.push(';');
    }
}

/// Type of a member as written
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TypeSpec {
    Primitive(Primitive),
    /// `struct Name`
    StructRef(String),
    /// `enum Name`
    EnumRef(String),
    /// Bare type name; the linker decides between struct and enum
    Named(String),
    /// Struct defined in place, owned by the member
    Struct(Box<StructDef>),
    /// Enum defined in place
    Enum(Box<EnumDef>),
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSpec::Primitive(p) => write!(f, "{}", p),
            TypeSpec::StructRef(name) => write!(f, "struct {}", name),
            TypeSpec::EnumRef(name) => write!(f, "enum {}", name),
            TypeSpec::Named(name) => write!(f, "{}", name),
            TypeSpec::Struct(def) => match &def.name {
                Some(name) => write!(f, "struct {}", name),
                None => write!(f, "struct"),
            },
            TypeSpec::Enum(def) => write!(f, "enum {}", def.name),
        }
    }
}

/// C scalar types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Primitive {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    Char,
    Bool,
    F32,
    F64,
    Pointer,
}

impl Primitive {
    /// Recognise a type from its specifier words
    ///
    /// Qualifiers are ignored. `long` is 32 bits and `long long` 64, as on
    /// the 32-bit targets flight software is usually built for.
    pub fn from_words(words: &[String]) -> Option<Primitive> {
        let words: Vec<&str> = words
            .iter()
            .map(String::as_str)
            .filter(|w| !matches!(*w, "const" | "volatile" | "register" | "static"))
            .collect();

        if let [single] = words.as_slice() {
            let named = match *single {
                "uint8_t" => Some(Primitive::U8),
                "uint16_t" => Some(Primitive::U16),
                "uint32_t" => Some(Primitive::U32),
                "uint64_t" => Some(Primitive::U64),
                "int8_t" => Some(Primitive::I8),
                "int16_t" => Some(Primitive::I16),
                "int32_t" => Some(Primitive::I32),
                "int64_t" => Some(Primitive::I64),
                "bool" | "_Bool" => Some(Primitive::Bool),
                "float" => Some(Primitive::F32),
                "double" => Some(Primitive::F64),
                _ => None,
            };
            if named.is_some() {
                return named;
            }
        }

        let mut signed = None;
        let mut base = None;
        let mut longs = 0;
        for word in &words {
            match *word {
                "signed" => signed = Some(true),
                "unsigned" => signed = Some(false),
                "char" | "short" => match base {
                    None | Some("int") => base = Some(*word),
                    _ => return None,
                },
                "int" => {
                    if base.is_none() {
                        base = Some("int");
                    }
                }
                "long" => longs += 1,
                _ => return None,
            }
        }

        let primitive = match (base, longs, signed) {
            (None, 0, None) => return None,
            (Some("char"), 0, None) => Primitive::Char,
            (Some("char"), 0, Some(true)) => Primitive::I8,
            (Some("char"), 0, Some(false)) => Primitive::U8,
            (Some("short"), 0, Some(false)) => Primitive::U16,
            (Some("short"), 0, _) => Primitive::I16,
            (_, 0 | 1, Some(false)) => Primitive::U32,
            (_, 0 | 1, _) => Primitive::I32,
            (_, 2, Some(false)) => Primitive::U64,
            (_, 2, _) => Primitive::I64,
            _ => return None,
        };
        Some(primitive)
    }

    /// Width in bits
    pub fn bits(&self) -> u32 {
        match self {
            Primitive::U8 | Primitive::I8 | Primitive::Char | Primitive::Bool => 8,
            Primitive::U16 | Primitive::I16 => 16,
            Primitive::U32 | Primitive::I32 | Primitive::F32 | Primitive::Pointer => 32,
            Primitive::U64 | Primitive::I64 | Primitive::F64 => 64,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Primitive::I8 | Primitive::I16 | Primitive::I32 | Primitive::I64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64)
    }

    /// Canonical C spelling
    pub fn c_name(&self) -> &'static str {
        match self {
            Primitive::U8 => "uint8_t",
            Primitive::U16 => "uint16_t",
            Primitive::U32 => "uint32_t",
            Primitive::U64 => "uint64_t",
            Primitive::I8 => "int8_t",
            Primitive::I16 => "int16_t",
            Primitive::I32 => "int32_t",
            Primitive::I64 => "int64_t",
            Primitive::Char => "char",
            Primitive::Bool => "bool",
            Primitive::F32 => "float",
            Primitive::F64 => "double",
            Primitive::Pointer => "void *",
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.c_name())
    }
}

/// Unevaluated constant expression (array dimension, bit width, enum value)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstExpr {
    /// Source text, trimmed
    pub text: String,
    pub span: Span,
}

impl ConstExpr {
    pub fn new(text: impl Into<String>, span: Span) -> Self {
        ConstExpr {
            text: text.into().trim().to_string(),
            span,
        }
    }
}

/// An enum body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumDef {
    pub name: String,
    pub entries: Vec<EnumEntry>,
    pub span: Span,
    pub body: Span,
    pub file: FileId,
    pub tags: Tags,
}

impl EnumDef {
    pub fn signature(&self) -> String {
        let mut out = String::from("{");
        for entry in &self.entries {
            out.push_str(&entry.name);
            if let Some(value) = &entry.value {
                out.push('=');
                out.push_str(&value.text);
            }
            out.push(',');
        }
        out.push('}');
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumEntry {
    pub name: String,
    /// Explicit `= expr`; otherwise previous value plus one
    pub value: Option<ConstExpr>,
    pub span: Span,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructRef {
    /// Referenced struct
    pub name: String,
    /// Declared variable, if any
    pub variable: Option<String>,
    pub array: Vec<ConstExpr>,
    pub span: Span,
    pub file: FileId,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumRef {
    pub name: String,
    pub variable: Option<String>,
    pub span: Span,
    pub file: FileId,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extern {
    pub name: String,
    /// Type words as written, qualifiers dropped
    pub ty: String,
    pub array: Vec<ConstExpr>,
    pub span: Span,
    pub file: FileId,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Define {
    pub name: String,
    /// Parameter names of a function-like macro
    pub params: Option<Vec<String>>,
    /// Replacement text
    pub expression: String,
    pub span: Span,
    pub file: FileId,
    pub tags: Tags,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_primitive_from_words() {
        let cases = [
            ("uint8_t", Some(Primitive::U8)),
            ("const int16_t", Some(Primitive::I16)),
            ("unsigned char", Some(Primitive::U8)),
            ("signed char", Some(Primitive::I8)),
            ("char", Some(Primitive::Char)),
            ("unsigned short int", Some(Primitive::U16)),
            ("short", Some(Primitive::I16)),
            ("unsigned", Some(Primitive::U32)),
            ("long", Some(Primitive::I32)),
            ("unsigned long long", Some(Primitive::U64)),
            ("long long int", Some(Primitive::I64)),
            ("_Bool", Some(Primitive::Bool)),
            ("double", Some(Primitive::F64)),
            ("MyType", None),
            ("unsigned MyType", None),
            ("", None),
        ];
        for (text, expected) in cases {
            assert_eq!(Primitive::from_words(&words(text)), expected, "{}", text);
        }
    }

    #[test]
    fn test_bits_and_sign() {
        assert_eq!(Primitive::U16.bits(), 16);
        assert_eq!(Primitive::F64.bits(), 64);
        assert!(Primitive::I8.is_signed());
        assert!(!Primitive::Char.is_signed());
        assert!(Primitive::F32.is_float());
    }

    #[test]
    fn test_signature_ignores_positions() {
        let member = |name: &str, start: usize| Member {
            name: name.to_string(),
            ty: TypeSpec::Primitive(Primitive::U8),
            array: vec![ConstExpr::new(" N ", Span::new(start, start + 1))],
            bit_width: None,
            span: Span::new(start, start + 10),
            tags: Tags::new(),
        };
        let def = |start: usize| StructDef {
            name: Some("S".to_string()),
            packed: false,
            members: vec![member("a", start)],
            span: Span::new(start, start + 20),
            body: Span::new(start, start + 20),
            file: FileId(start),
            tags: Tags::new(),
        };
        assert_eq!(def(0).signature(), def(100).signature());
        assert_eq!(def(0).signature(), "{uint8_t a[N];}");
    }
}
