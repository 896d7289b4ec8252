//! Structural parsing of C headers
//!
//! [`parse_file`] runs the per-file pipeline (clean, filter, parse) and
//! returns a [`ParsedFile`] holding every text variant, the harvested
//! comments and the top-level [`Structure`] tree. Files are independent of
//! each other here; names are resolved later by the linker.

mod ast;
mod c_parser;
mod file;

pub use ast::{
    ConstExpr, Define, EnumDef, EnumEntry, EnumRef, Extern, FileId, Member, Primitive, StructDef,
    StructRef, Structure, TypeSpec,
};
pub use c_parser::{CParser, ParseOutput};
pub use file::{parse_file, ParsedFile, SourceFile, SourceText};
