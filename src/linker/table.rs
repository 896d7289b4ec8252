use super::constants::{solve, Constants, Pending};
use super::resolved::{Count, ResolvedEntry, ResolvedEnum, ResolvedMember, ResolvedStruct, ResolvedType};
use crate::config::MacroConfig;
use crate::error::{Diagnostic, Diagnostics, Error, Location};
use crate::lexer::{Comment, LineMap};
use crate::parser::{
    ConstExpr, EnumDef, FileId, ParsedFile, StructDef, Structure, TypeSpec,
};
use crate::preprocessor::EvalError;
use std::collections::{BTreeMap, BTreeSet};

/// What the linker keeps of a parsed file
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub id: FileId,
    pub name: String,
    pub line_map: LineMap,
    /// Retained comments, attached or not
    pub comments: Vec<Comment>,
}

/// Entry of the ordinary-identifier namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueRef {
    /// `#define` or `extern` in the arena
    Decl(usize),
    /// Enum in the arena and the entry index
    EnumConstant(usize, usize),
}

/// Symbol table over every parsed file
///
/// Structures live in one arena; the tag namespace (structs, enums) and
/// the ordinary namespace (defines, externs, enum constants) index into it.
/// The table is read-only once [`link`] returns.
#[derive(Debug, Clone, Default)]
pub struct LinkedTable {
    files: Vec<FileInfo>,
    arena: Vec<Structure>,
    tags: BTreeMap<String, usize>,
    values: BTreeMap<String, ValueRef>,
    constants: Constants,
    /// Structs that contain themselves
    cyclic: BTreeSet<String>,
}

impl LinkedTable {
    /// Definition of a tag or ordinary name, tags first
    pub fn symbol(&self, name: &str) -> Option<&Structure> {
        if let Some(&index) = self.tags.get(name) {
            return self.arena.get(index);
        }
        match self.values.get(name)? {
            ValueRef::Decl(index) | ValueRef::EnumConstant(index, _) => self.arena.get(*index),
        }
    }

    pub fn struct_def(&self, name: &str) -> Option<&StructDef> {
        match self.arena.get(*self.tags.get(name)?)? {
            Structure::StructDef(def) => Some(def),
            _ => None,
        }
    }

    pub fn enum_def(&self, name: &str) -> Option<&EnumDef> {
        match self.arena.get(*self.tags.get(name)?)? {
            Structure::EnumDef(def) => Some(def),
            _ => None,
        }
    }

    /// Every kept definition in file order
    pub fn structures(&self) -> impl Iterator<Item = &Structure> {
        self.arena.iter()
    }

    /// Names of all defined structs, sorted
    pub fn struct_names(&self) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .filter(|(_, &index)| matches!(self.arena[index], Structure::StructDef(_)))
            .map(|(name, _)| name.as_str())
    }

    pub fn constants(&self) -> &Constants {
        &self.constants
    }

    pub fn constant(&self, name: &str) -> Option<i64> {
        self.constants.get(name)
    }

    /// Evaluate an integer expression in the constant environment
    pub fn evaluate(&self, text: &str) -> Result<i64, EvalError> {
        self.constants.evaluate(text)
    }

    pub fn files(&self) -> &[FileInfo] {
        &self.files
    }

    /// Every retained comment with its file, in file order
    pub fn comments(&self) -> impl Iterator<Item = (&FileInfo, &Comment)> {
        self.files
            .iter()
            .flat_map(|file| file.comments.iter().map(move |c| (file, c)))
    }

    /// Location of `offset` in file `file`
    pub fn locate(&self, file: FileId, offset: usize) -> Location {
        match self.files.iter().find(|f| f.id == file) {
            Some(info) => info.line_map.locate(&info.name, offset),
            None => Location {
                file: format!("#{}", file.0),
                offset,
                line: 0,
                column: 0,
            },
        }
    }

    pub fn is_cyclic(&self, name: &str) -> bool {
        self.cyclic.contains(name)
    }

    /// Enum `name` with every value evaluated
    pub fn resolve_enum(&self, name: &str) -> Option<ResolvedEnum> {
        self.enum_def(name).map(|def| self.resolve_enum_def(def))
    }

    /// Fully expanded tree of struct `root`
    pub fn expand(&self, root: &str) -> Option<ResolvedStruct> {
        let def = self.struct_def(root)?;
        let mut stack = Vec::new();
        Some(self.expand_def(def, root, &mut stack))
    }

    fn expand_def(&self, def: &StructDef, name: &str, stack: &mut Vec<String>) -> ResolvedStruct {
        stack.push(name.to_string());
        let mut preceding: Vec<String> = Vec::new();
        let mut members = Vec::new();

        for member in &def.members {
            let ty = match &member.ty {
                TypeSpec::Primitive(p) => ResolvedType::Primitive(*p),
                TypeSpec::Named(type_name) => match (self.struct_def(type_name), self.enum_def(type_name)) {
                    (Some(inner), _) => self.expand_named(type_name, inner, stack),
                    (None, Some(inner)) => ResolvedType::Enum(self.resolve_enum_def(inner)),
                    (None, None) => ResolvedType::Unresolved(type_name.clone()),
                },
                TypeSpec::StructRef(type_name) => match self.struct_def(type_name) {
                    Some(inner) => self.expand_named(type_name, inner, stack),
                    None => ResolvedType::Unresolved(type_name.clone()),
                },
                TypeSpec::EnumRef(type_name) => match self.enum_def(type_name) {
                    Some(inner) => ResolvedType::Enum(self.resolve_enum_def(inner)),
                    None => ResolvedType::Unresolved(type_name.clone()),
                },
                TypeSpec::Struct(inner) => {
                    let inner_name = inner.name.clone().unwrap_or_else(|| member.name.clone());
                    ResolvedType::Struct(Box::new(self.expand_def(inner, &inner_name, stack)))
                }
                TypeSpec::Enum(inner) => ResolvedType::Enum(self.resolve_enum_def(inner)),
            };

            let evaluated = member
                .bit_width
                .as_ref()
                .and_then(|w| self.evaluate(&w.text).ok())
                .filter(|w| *w > 0);
            let bit_width = match evaluated.map(u32::try_from) {
                Some(Ok(width)) => Some(width),
                Some(Err(_)) => {
                    tracing::debug!(member = %member.name, "bit width out of range, member skipped");
                    continue;
                }
                None => None,
            };

            members.push(ResolvedMember {
                name: member.name.clone(),
                ty,
                count: self.count_of(&member.array, &preceding),
                bit_width,
                tags: member.tags.clone(),
                location: self.locate(def.file, member.span.start),
            });
            preceding.push(member.name.clone());
        }

        stack.pop();
        ResolvedStruct {
            name: name.to_string(),
            packed: def.packed,
            members,
            tags: def.tags.clone(),
            location: self.locate(def.file, def.span.start),
        }
    }

    fn expand_named(&self, name: &str, def: &StructDef, stack: &mut Vec<String>) -> ResolvedType {
        if stack.iter().any(|n| n == name) {
            return ResolvedType::Unresolved(name.to_string());
        }
        ResolvedType::Struct(Box::new(self.expand_def(def, name, stack)))
    }

    fn resolve_enum_def(&self, def: &EnumDef) -> ResolvedEnum {
        let mut next = 0i64;
        let entries = def
            .entries
            .iter()
            .map(|entry| {
                let value = match &entry.value {
                    Some(expr) => self.evaluate(&expr.text).ok(),
                    None => None,
                }
                .or_else(|| self.constant(&entry.name))
                .unwrap_or(next);
                next = value.wrapping_add(1);
                ResolvedEntry {
                    name: entry.name.clone(),
                    value,
                    tags: entry.tags.clone(),
                }
            })
            .collect();
        ResolvedEnum {
            name: def.name.clone(),
            entries,
            tags: def.tags.clone(),
        }
    }

    /// Evaluate one array dimension
    fn dimension(&self, dim: &ConstExpr, preceding: &[String]) -> Result<Count, String> {
        if dim.text.is_empty() {
            return Ok(Count::Flexible);
        }
        match self.evaluate(&dim.text) {
            Ok(n) if n >= 0 => Ok(Count::Fixed(n as u64)),
            Ok(n) => Err(format!("negative array dimension {}", n)),
            Err(_) if preceding.iter().any(|p| *p == dim.text) => Ok(Count::Dynamic(dim.text.clone())),
            Err(e) => Err(format!(
                "array dimension `{}` is neither constant nor a preceding field: {}",
                dim.text, e
            )),
        }
    }

    fn count_of(&self, dims: &[ConstExpr], preceding: &[String]) -> Count {
        if dims.is_empty() {
            return Count::Scalar;
        }
        let mut total = 1u64;
        let mut variable = None;
        for dim in dims {
            match self.dimension(dim, preceding) {
                Ok(Count::Fixed(n)) => total = total.saturating_mul(n),
                Ok(other) => {
                    variable.get_or_insert(other);
                }
                Err(_) => {
                    variable.get_or_insert(Count::Unknown(dim.text.clone()));
                }
            }
        }
        variable.unwrap_or(Count::Fixed(total))
    }
}

/// Merge per-file trees into one table
///
/// Phase one registers every declaration in file order; a name defined
/// twice with different bodies keeps the first and reports both places.
/// Phase two solves the constant environment and checks every reference,
/// dimension and bit width. Files may arrive in any order; they are
/// sorted by [`FileId`] first.
pub fn link(mut files: Vec<ParsedFile>, macros: &MacroConfig) -> (LinkedTable, Diagnostics) {
    files.sort_by_key(|f| f.id);
    let mut linker = Linker::default();

    for file in files {
        let ParsedFile {
            id,
            name,
            line_map,
            comments,
            structures,
            ..
        } = file;
        linker.table.files.push(FileInfo {
            id,
            name,
            line_map,
            comments,
        });
        for structure in structures {
            linker.register(structure);
        }
    }

    linker.solve_constants(macros);
    linker.validate();

    tracing::info!(
        files = linker.table.files.len(),
        definitions = linker.table.arena.len(),
        constants = linker.table.constants.len(),
        defects = linker.diagnostics.len(),
        "linked symbol table"
    );
    (linker.table, linker.diagnostics)
}

#[derive(Default)]
struct Linker {
    table: LinkedTable,
    diagnostics: Diagnostics,
    /// Top-level `struct X;` / `enum X v;` declarations to check
    references: Vec<Structure>,
}

impl Linker {
    fn location_of(&self, structure: &Structure) -> Location {
        self.table.locate(structure.file(), structure.span().start)
    }

    fn register(&mut self, structure: Structure) {
        match &structure {
            Structure::StructDef(def) => {
                // Enums declared inside the body still define constants
                let mut inline = Vec::new();
                collect_inline_enums(def, &mut inline);
                let inserted = match def.name.clone() {
                    Some(name) => self.register_tag(name, structure),
                    None => false,
                };
                if inserted {
                    for inner in inline {
                        self.register(Structure::EnumDef(inner));
                    }
                }
            }
            Structure::EnumDef(def) if def.name.is_empty() => {
                let index = self.push(structure);
                self.register_enum_constants(index);
            }
            Structure::EnumDef(def) => {
                let name = def.name.clone();
                self.register_tag(name, structure);
            }
            Structure::StructRef(_) | Structure::EnumRef(_) => self.references.push(structure),
            Structure::Extern(_) | Structure::Define(_) => {
                let name = structure.name().unwrap_or_default().to_string();
                match self.table.values.get(&name).copied() {
                    Some(ValueRef::Decl(existing)) if same_body(&self.table.arena[existing], &structure) => {}
                    Some(ValueRef::Decl(existing)) | Some(ValueRef::EnumConstant(existing, _)) => {
                        let kept = self.location_of(&self.table.arena[existing]);
                        self.conflict(&name, &structure, kept);
                    }
                    None => {
                        let index = self.push(structure);
                        self.table.values.insert(name, ValueRef::Decl(index));
                    }
                }
            }
        }
    }

    /// Returns false when `name` was already taken
    fn register_tag(&mut self, name: String, structure: Structure) -> bool {
        if let Some(&existing) = self.table.tags.get(&name) {
            if same_body(&self.table.arena[existing], &structure) {
                tracing::debug!(name = %name, "merged identical duplicate definition");
            } else {
                let kept = self.location_of(&self.table.arena[existing]);
                self.conflict(&name, &structure, kept);
            }
            return false;
        }
        let is_enum = matches!(structure, Structure::EnumDef(_));
        let index = self.push(structure);
        self.table.tags.insert(name, index);
        if is_enum {
            self.register_enum_constants(index);
        }
        true
    }

    fn register_enum_constants(&mut self, index: usize) {
        let Structure::EnumDef(def) = &self.table.arena[index] else {
            return;
        };
        let entries: Vec<(usize, String, usize)> = def
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, e.name.clone(), e.span.start))
            .collect();
        let file = def.file;

        for (entry, name, offset) in entries {
            match self.table.values.get(&name).copied() {
                None => {
                    self.table
                        .values
                        .insert(name, ValueRef::EnumConstant(index, entry));
                }
                Some(ValueRef::Decl(existing)) | Some(ValueRef::EnumConstant(existing, _)) => {
                    let kept = self.location_of(&self.table.arena[existing]);
                    let here = self.table.locate(file, offset);
                    self.diagnostics.push(
                        Diagnostic::at(
                            Error::link(format!(
                                "conflicting definitions of `{}`; keeping the first",
                                name
                            )),
                            here,
                        )
                        .with_related(kept),
                    );
                }
            }
        }
    }

    fn push(&mut self, structure: Structure) -> usize {
        self.table.arena.push(structure);
        self.table.arena.len() - 1
    }

    fn conflict(&mut self, name: &str, rejected: &Structure, kept: Location) {
        let here = self.location_of(rejected);
        self.diagnostics.push(
            Diagnostic::at(
                Error::link(format!(
                    "conflicting definitions of `{}`; keeping the first",
                    name
                )),
                here,
            )
            .with_related(kept),
        );
    }

    fn solve_constants(&mut self, macros: &MacroConfig) {
        let mut pending = Vec::new();
        let mut enum_constants = BTreeMap::new();

        for (name, slot) in &self.table.values {
            match *slot {
                ValueRef::Decl(index) => {
                    if let Structure::Define(define) = &self.table.arena[index] {
                        if define.params.is_none() && !define.expression.is_empty() {
                            pending.push(Pending::new(name.clone(), define.expression.clone()));
                        }
                    }
                }
                ValueRef::EnumConstant(index, entry) => {
                    if let Structure::EnumDef(def) = &self.table.arena[index] {
                        let expression = match (&def.entries[entry].value, entry) {
                            (Some(value), _) => value.text.clone(),
                            (None, 0) => "0".to_string(),
                            (None, i) => format!("({}) + 1", def.entries[i - 1].name),
                        };
                        pending.push(Pending::new(name.clone(), expression));
                        let location = self.table.locate(def.file, def.entries[entry].span.start);
                        enum_constants.insert(name.clone(), location);
                    }
                }
            }
        }

        let (constants, unresolved) = solve(macros, pending);
        self.table.constants = constants;

        for (item, error) in unresolved {
            match enum_constants.remove(&item.name) {
                Some(location) => self.diagnostics.push(Diagnostic::at(
                    Error::link(format!(
                        "cannot evaluate enum constant `{}` = {}: {}",
                        item.name, item.expression, error
                    )),
                    location,
                )),
                None => tracing::debug!(
                    name = %item.name,
                    expression = %item.expression,
                    "define is not an integer constant"
                ),
            }
        }
    }

    fn validate(&mut self) {
        let arena = self.table.arena.clone();
        for structure in &arena {
            match structure {
                Structure::StructDef(def) => {
                    let owner = def.name.clone().unwrap_or_default();
                    self.validate_struct(def, &owner);
                }
                Structure::Extern(ext) => {
                    for dim in &ext.array {
                        if let Err(message) = self.table.dimension(dim, &[]) {
                            let location = self.table.locate(ext.file, dim.span.start);
                            self.diagnostics.push(Diagnostic::at(Error::link(message), location));
                        }
                    }
                }
                _ => {}
            }
        }

        let references = std::mem::take(&mut self.references);
        for reference in &references {
            let (name, defined) = match reference {
                Structure::StructRef(r) => (&r.name, self.table.struct_def(&r.name).is_some()),
                Structure::EnumRef(r) => (&r.name, self.table.enum_def(&r.name).is_some()),
                _ => continue,
            };
            if !defined {
                let location = self.location_of(reference);
                self.diagnostics.push(Diagnostic::at(
                    Error::link(format!("`{}` is declared but never defined", name)),
                    location,
                ));
            }
            if let Structure::StructRef(r) = reference {
                for dim in &r.array {
                    if let Err(message) = self.table.dimension(dim, &[]) {
                        let location = self.table.locate(r.file, dim.span.start);
                        self.diagnostics.push(Diagnostic::at(Error::link(message), location));
                    }
                }
            }
        }

        self.find_cycles();
    }

    fn validate_struct(&mut self, def: &StructDef, owner: &str) {
        let mut preceding: Vec<String> = Vec::new();
        for member in &def.members {
            let here = self.table.locate(def.file, member.span.start);
            let unknown = match &member.ty {
                TypeSpec::Named(name) => {
                    (!self.table.tags.contains_key(name)).then(|| format!("unknown type `{}`", name))
                }
                TypeSpec::StructRef(name) => self
                    .table
                    .struct_def(name)
                    .is_none()
                    .then(|| format!("unknown type `struct {}`", name)),
                TypeSpec::EnumRef(name) => self
                    .table
                    .enum_def(name)
                    .is_none()
                    .then(|| format!("unknown type `enum {}`", name)),
                TypeSpec::Struct(inner) => {
                    let inner_owner = format!("{}.{}", owner, member.name);
                    self.validate_struct(inner, &inner_owner);
                    None
                }
                TypeSpec::Primitive(_) | TypeSpec::Enum(_) => None,
            };
            if let Some(message) = unknown {
                self.diagnostics.push(Diagnostic::at(
                    Error::link(format!("{} for member `{}.{}`", message, owner, member.name)),
                    here.clone(),
                ));
            }

            for dim in &member.array {
                if let Err(message) = self.table.dimension(dim, &preceding) {
                    let location = self.table.locate(def.file, dim.span.start);
                    self.diagnostics.push(Diagnostic::at(
                        Error::link(format!("{} in `{}.{}`", message, owner, member.name)),
                        location,
                    ));
                }
            }

            if let Some(width) = &member.bit_width {
                let limit = match &member.ty {
                    TypeSpec::Primitive(p) => i64::from(p.bits()),
                    _ => 32,
                };
                let problem = match self.table.evaluate(&width.text) {
                    Ok(w) if w > 0 && w <= limit => None,
                    Ok(w) => Some(format!("bit width {} does not fit its type", w)),
                    Err(e) => Some(format!("cannot evaluate bit width `{}`: {}", width.text, e)),
                };
                if let Some(problem) = problem {
                    let location = self.table.locate(def.file, width.span.start);
                    self.diagnostics.push(Diagnostic::at(
                        Error::link(format!("{} in `{}.{}`", problem, owner, member.name)),
                        location,
                    ));
                }
            }

            preceding.push(member.name.clone());
        }
    }

    /// Report every struct that reaches itself through its members
    fn find_cycles(&mut self) {
        let mut edges: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, &index) in &self.table.tags {
            if let Structure::StructDef(def) = &self.table.arena[index] {
                let mut targets = Vec::new();
                collect_struct_edges(def, &mut targets);
                targets.retain(|t| self.table.struct_def(t).is_some());
                edges.insert(name.clone(), targets);
            }
        }

        let mut cyclic = BTreeSet::new();
        for start in edges.keys() {
            let mut stack = vec![start.clone()];
            let mut seen = BTreeSet::new();
            while let Some(node) = stack.pop() {
                for next in edges.get(&node).into_iter().flatten() {
                    if next == start {
                        cyclic.insert(start.clone());
                    } else if seen.insert(next.clone()) {
                        stack.push(next.clone());
                    }
                }
            }
        }

        for name in &cyclic {
            if let Some(&index) = self.table.tags.get(name) {
                let location = self.location_of(&self.table.arena[index]);
                self.diagnostics.push(Diagnostic::at(
                    Error::link(format!("struct `{}` contains itself", name)),
                    location,
                ));
            }
        }
        self.table.cyclic = cyclic;
    }
}

fn collect_struct_edges(def: &StructDef, out: &mut Vec<String>) {
    for member in &def.members {
        match &member.ty {
            TypeSpec::Named(name) | TypeSpec::StructRef(name) => out.push(name.clone()),
            TypeSpec::Struct(inner) => collect_struct_edges(inner, out),
            _ => {}
        }
    }
}

fn collect_inline_enums(def: &StructDef, out: &mut Vec<EnumDef>) {
    for member in &def.members {
        match &member.ty {
            TypeSpec::Enum(inner) => out.push((**inner).clone()),
            TypeSpec::Struct(inner) => collect_inline_enums(inner, out),
            _ => {}
        }
    }
}

/// Position-independent equality of two definitions
fn same_body(a: &Structure, b: &Structure) -> bool {
    match (a, b) {
        (Structure::StructDef(x), Structure::StructDef(y)) => x.signature() == y.signature(),
        (Structure::EnumDef(x), Structure::EnumDef(y)) => x.signature() == y.signature(),
        (Structure::Define(x), Structure::Define(y)) => {
            x.params == y.params && x.expression == y.expression
        }
        (Structure::Extern(x), Structure::Extern(y)) => {
            x.ty == y.ty
                && x.array.len() == y.array.len()
                && x.array.iter().zip(&y.array).all(|(p, q)| p.text == q.text)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MacroValue;
    use crate::error::DefectKind;
    use crate::parser::{parse_file, SourceFile};

    fn link_sources(sources: &[(&str, &str)], macros: &MacroConfig) -> (LinkedTable, Diagnostics) {
        let files = sources
            .iter()
            .enumerate()
            .map(|(i, (name, text))| parse_file(FileId(i), &SourceFile::new(*name, *text), macros))
            .collect();
        link(files, macros)
    }

    #[test]
    fn test_forward_references_across_files() {
        let (table, diagnostics) = link_sources(
            &[
                ("pkt.h", "struct Pkt { Hdr hdr; Item items[N_ITEMS]; };"),
                ("defs.h", "#define N_ITEMS (2 * 2)\nstruct Hdr { uint16_t apid; };\nstruct Item { uint8_t v; };"),
            ],
            &MacroConfig::new(),
        );
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        let pkt = table.expand("Pkt").unwrap();
        assert_eq!(pkt.members[1].count, Count::Fixed(4));
        assert_eq!(pkt.bit_size(), Some(16 + 4 * 8));
        assert_eq!(pkt.members[0].struct_type().unwrap().name, "Hdr");
    }

    #[test]
    fn test_conflict_keeps_first_with_both_locations() {
        let (table, diagnostics) = link_sources(
            &[
                ("a.h", "struct Shared { uint8_t a; };"),
                ("b.h", "\nstruct Shared { uint16_t b; };"),
            ],
            &MacroConfig::new(),
        );
        let conflicts: Vec<_> = diagnostics.of_kind(DefectKind::Link).collect();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].file(), Some("b.h"));
        assert_eq!(conflicts[0].location.as_ref().unwrap().line, 2);
        assert_eq!(conflicts[0].related[0].file, "a.h");
        assert!(table.struct_def("Shared").unwrap().member("a").is_some());
    }

    #[test]
    fn test_identical_duplicates_merge() {
        let text = "#define N 3\nstruct S { uint8_t a[N]; };";
        let (_, diagnostics) = link_sources(&[("a.h", text), ("b.h", text)], &MacroConfig::new());
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_enum_values_and_constants() {
        let mut macros = MacroConfig::new();
        macros.set("BASE", MacroValue::Value(5));
        let (table, diagnostics) = link_sources(
            &[("e.h", "enum Mode { A = BASE, B, C = B + 10, D };\nenum { X = 7 };")],
            &macros,
        );
        assert!(diagnostics.is_empty());
        let mode = table.resolve_enum("Mode").unwrap();
        let values: Vec<i64> = mode.entries.iter().map(|e| e.value).collect();
        assert_eq!(values, vec![5, 6, 16, 17]);
        assert_eq!(table.constant("X"), Some(7));
    }

    #[test]
    fn test_unresolved_types_dimensions_and_cycles() {
        let (table, diagnostics) = link_sources(
            &[(
                "x.h",
                "struct A { Missing m; uint8_t n; uint8_t d[n]; uint8_t bad[LATER]; uint8_t w : 9; };\n\
                 struct Loop { struct Loop2 inner; };\n\
                 struct Loop2 { Loop back; };\n",
            )],
            &MacroConfig::new(),
        );
        assert_eq!(diagnostics.count(DefectKind::Link), 5, "{:#?}", diagnostics);
        assert!(table.is_cyclic("Loop"));
        assert!(table.is_cyclic("Loop2"));
        let a = table.expand("A").unwrap();
        assert_eq!(a.members[0].ty, ResolvedType::Unresolved("Missing".to_string()));
        assert_eq!(a.members[2].count, Count::Dynamic("n".to_string()));
        assert_eq!(a.members[3].count, Count::Unknown("LATER".to_string()));
        let looped = table.expand("Loop").unwrap();
        let inner = looped.members[0].struct_type().unwrap();
        assert_eq!(inner.members[0].ty, ResolvedType::Unresolved("Loop".to_string()));
    }

    #[test]
    fn test_out_of_range_bit_width_skips_member() {
        let (table, diagnostics) = link_sources(
            &[("w.h", "struct W { uint8_t a; uint32_t wide : 0x100000001; uint8_t b; };")],
            &MacroConfig::new(),
        );
        assert_eq!(diagnostics.count(DefectKind::Link), 1, "{:#?}", diagnostics);
        let w = table.expand("W").unwrap();
        let names: Vec<_> = w.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(w.bit_size(), Some(16));
    }
}
