use super::ast::{
    ConstExpr, Define, EnumDef, EnumEntry, EnumRef, Extern, FileId, Member, Primitive, StructDef,
    StructRef, Structure, TypeSpec,
};
use crate::error::Error;
use crate::lexer::{Comment, Span, Tags, Token, TokenKind};
use serde_json::Value;

/// A declaration that could not be parsed
struct Failure {
    error: Error,
    offset: usize,
    /// Token index to restart at; `None` skips to the end of the declaration
    resume: Option<usize>,
}

type PResult<T> = std::result::Result<T, Failure>;

/// Output of [`CParser::parse`]
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutput {
    /// Top-level declarations in source order
    pub structures: Vec<Structure>,
    /// Structural defects with the offset they start at
    pub errors: Vec<(Error, usize)>,
    /// Per comment: whether it was attached to a declaration
    pub attached: Vec<bool>,
}

/// One declarator of a member declaration
struct Declarator {
    name: String,
    pointer: bool,
    array: Vec<ConstExpr>,
    bit_width: Option<ConstExpr>,
}

/// Recursive descent parser over the declarations of one file
///
/// Recognises top-level `struct`, `typedef struct/enum`, `enum`, `extern`
/// and `#define`; everything else is skipped up to its `;` or closing
/// brace. Comments are attached to declarations while parsing, so the
/// scope of every comment is known without a second walk.
pub struct CParser<'a> {
    tokens: Vec<Token>,
    current: usize,
    /// Cleaned text, for expression source
    text: &'a str,
    file: FileId,
    /// Retained comments, sorted by position
    comments: &'a [Comment],
    claimed: Vec<bool>,
    /// First comment not yet passed over
    next_comment: usize,
    /// Comments starting before this offset belong to earlier declarations
    floor: usize,
    /// Open `extern "C" {` blocks
    linkage_depth: usize,
    /// `#define`s met inside struct bodies
    nested_defines: Vec<Structure>,
    errors: Vec<(Error, usize)>,
}

impl<'a> CParser<'a> {
    /// Creates a parser over the tokens of `text`
    pub fn new(tokens: Vec<Token>, text: &'a str, comments: &'a [Comment], file: FileId) -> Self {
        CParser {
            tokens,
            current: 0,
            text,
            file,
            comments,
            claimed: vec![false; comments.len()],
            next_comment: 0,
            floor: 0,
            linkage_depth: 0,
            nested_defines: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Parses every top-level declaration
    pub fn parse(mut self) -> ParseOutput {
        let mut structures = Vec::new();

        while !self.is_at_end() {
            let token = self.peek().clone();
            let leading = self.claim_leading(token.span.start);

            let result = match &token.kind {
                TokenKind::Semicolon => {
                    self.advance();
                    Ok(Vec::new())
                }
                TokenKind::RightBrace => {
                    self.advance();
                    if self.linkage_depth > 0 {
                        self.linkage_depth -= 1;
                        Ok(Vec::new())
                    } else {
                        Err(Failure {
                            error: Error::structural("unmatched `}`"),
                            offset: token.span.start,
                            resume: Some(self.current),
                        })
                    }
                }
                TokenKind::Define { .. } => Ok(self.define().into_iter().collect()),
                TokenKind::Identifier(word) => match word.as_str() {
                    "typedef" => self.typedef(),
                    "struct" => self.struct_declaration(),
                    "enum" => self.enum_declaration(),
                    "extern" => self.extern_declaration(),
                    _ => {
                        self.skip_declaration();
                        Ok(Vec::new())
                    }
                },
                _ => {
                    self.skip_declaration();
                    Ok(Vec::new())
                }
            };

            match result {
                Ok(items) if items.is_empty() => {
                    let passed = self.finish_comments(&leading, self.previous_end());
                    self.release(&passed);
                    structures.append(&mut self.nested_defines);
                }
                Ok(mut items) => {
                    let tags = self.finish_tags(&leading, self.previous_end());
                    for item in &mut items {
                        item.tags_mut().merge(&tags);
                    }
                    structures.extend(items);
                    structures.append(&mut self.nested_defines);
                }
                Err(failure) => {
                    self.release(&leading);
                    self.errors.push((failure.error, failure.offset));
                    self.nested_defines.clear();
                    match failure.resume {
                        Some(index) => self.current = index,
                        None => self.skip_declaration(),
                    }
                }
            }
        }

        tracing::debug!(
            file = self.file.0,
            structures = structures.len(),
            errors = self.errors.len(),
            "parsed declarations"
        );

        ParseOutput {
            structures,
            errors: self.errors,
            attached: self.claimed,
        }
    }

    // ---- declarations -------------------------------------------------

    fn define(&mut self) -> Option<Structure> {
        let token = self.advance().clone();
        match token.kind {
            TokenKind::Define { name, params, body } => Some(Structure::Define(Define {
                name,
                params,
                expression: body,
                span: token.span,
                file: self.file,
                tags: Tags::new(),
            })),
            _ => None,
        }
    }

    fn typedef(&mut self) -> PResult<Vec<Structure>> {
        let start = self.advance().span.start;
        self.skip_qualifiers();

        if self.check_word("struct") {
            self.advance();
            let mut packed = self.skip_attributes();
            let tag = self.optional_name();
            packed |= self.skip_attributes();
            if !self.check(&TokenKind::LeftBrace) {
                self.finish_declaration();
                return Ok(Vec::new());
            }
            let (members, body) = self.struct_body()?;
            packed |= self.skip_attributes();
            let names = self.typedef_names();
            let span = Span::new(start, self.previous_end());

            let mut defs: Vec<Structure> = Vec::new();
            for name in names.iter().chain(tag.iter()) {
                if defs.iter().any(|d| d.name() == Some(name.as_str())) {
                    continue;
                }
                defs.push(Structure::StructDef(StructDef {
                    name: Some(name.clone()),
                    packed,
                    members: members.clone(),
                    span,
                    body,
                    file: self.file,
                    tags: Tags::new(),
                }));
            }
            return Ok(defs);
        }

        if self.check_word("enum") {
            self.advance();
            let tag = self.optional_name();
            if !self.check(&TokenKind::LeftBrace) {
                self.finish_declaration();
                return Ok(Vec::new());
            }
            let (entries, body) = self.enum_body()?;
            let names = self.typedef_names();
            let span = Span::new(start, self.previous_end());

            let mut defs: Vec<Structure> = Vec::new();
            for name in names.iter().chain(tag.iter()) {
                if defs.iter().any(|d| d.name() == Some(name.as_str())) {
                    continue;
                }
                defs.push(Structure::EnumDef(EnumDef {
                    name: name.clone(),
                    entries: entries.clone(),
                    span,
                    body,
                    file: self.file,
                    tags: Tags::new(),
                }));
            }
            return Ok(defs);
        }

        self.finish_declaration();
        Ok(Vec::new())
    }

    /// Names after a typedef body up to and including `;`; pointer
    /// declarators are skipped
    fn typedef_names(&mut self) -> Vec<String> {
        let mut names = Vec::new();
        let mut pointer = false;
        while !self.is_at_end() {
            let token = self.advance().clone();
            match &token.kind {
                TokenKind::Semicolon => break,
                TokenKind::Punct('*') => pointer = true,
                TokenKind::Punct(',') => pointer = false,
                TokenKind::Identifier(word) if !is_attribute_word(word) => {
                    if !pointer {
                        names.push(word.clone());
                    }
                }
                TokenKind::Identifier(_) => {
                    if self.check_punct('(') {
                        self.skip_balanced();
                    }
                }
                TokenKind::Punct('(') => {
                    self.current -= 1;
                    self.skip_balanced();
                }
                _ => {}
            }
        }
        names
    }

    fn struct_declaration(&mut self) -> PResult<Vec<Structure>> {
        let start = self.advance().span.start;
        let mut packed = self.skip_attributes();
        let name = self.optional_name();
        packed |= self.skip_attributes();

        if self.check(&TokenKind::LeftBrace) {
            let (members, body) = self.struct_body()?;
            packed |= self.skip_attributes();
            self.finish_declaration();
            let Some(name) = name else {
                return Ok(Vec::new());
            };
            return Ok(vec![Structure::StructDef(StructDef {
                name: Some(name),
                packed,
                members,
                span: Span::new(start, self.previous_end()),
                body,
                file: self.file,
                tags: Tags::new(),
            })]);
        }

        let Some(name) = name else {
            return Err(self.fail("expected struct name or body"));
        };
        let mut pointer = false;
        while self.check_punct('*') {
            self.advance();
            pointer = true;
        }
        let variable = self.optional_name();
        if pointer || self.check_punct('(') {
            self.finish_declaration();
            return Ok(Vec::new());
        }
        let array = self.dimensions()?;
        self.skip_attributes();
        if !self.check(&TokenKind::Semicolon) {
            return Err(self.fail(format!("expected `;` after `struct {}`", name)));
        }
        self.advance();
        Ok(vec![Structure::StructRef(StructRef {
            name,
            variable,
            array,
            span: Span::new(start, self.previous_end()),
            file: self.file,
            tags: Tags::new(),
        })])
    }

    fn enum_declaration(&mut self) -> PResult<Vec<Structure>> {
        let start = self.advance().span.start;
        let name = self.optional_name();

        if self.check(&TokenKind::LeftBrace) {
            let (entries, body) = self.enum_body()?;
            self.finish_declaration();
            return Ok(vec![Structure::EnumDef(EnumDef {
                name: name.unwrap_or_default(),
                entries,
                span: Span::new(start, self.previous_end()),
                body,
                file: self.file,
                tags: Tags::new(),
            })]);
        }

        let Some(name) = name else {
            return Err(self.fail("expected enum name or body"));
        };
        let variable = self.optional_name();
        if self.check_punct('(') {
            self.finish_declaration();
            return Ok(Vec::new());
        }
        self.finish_declaration();
        Ok(vec![Structure::EnumRef(EnumRef {
            name,
            variable,
            span: Span::new(start, self.previous_end()),
            file: self.file,
            tags: Tags::new(),
        })])
    }

    fn extern_declaration(&mut self) -> PResult<Vec<Structure>> {
        let start = self.advance().span.start;

        if self.check(&TokenKind::StringLiteral) {
            self.advance();
            if self.check(&TokenKind::LeftBrace) {
                self.advance();
                self.linkage_depth += 1;
                return Ok(Vec::new());
            }
        }

        let mut words = Vec::new();
        while let Some(word) = self.peek().identifier() {
            if is_qualifier(word) {
                self.advance();
                continue;
            }
            if is_attribute_word(word) {
                self.skip_attributes();
                continue;
            }
            words.push(word.to_string());
            self.advance();
            while self.check_punct('*') {
                self.advance();
                words.push("*".to_string());
            }
        }

        if self.check_punct('(') || words.len() < 2 {
            self.finish_declaration();
            return Ok(Vec::new());
        }

        let name = words.pop().unwrap_or_default();
        let array = self.dimensions()?;
        self.skip_attributes();
        if self.check_punct('=') {
            self.finish_declaration();
        } else if self.check(&TokenKind::Semicolon) {
            self.advance();
        } else {
            return Err(self.fail(format!("expected `;` after extern `{}`", name)));
        }

        Ok(vec![Structure::Extern(Extern {
            name,
            ty: words.join(" ").replace(" *", "*"),
            array,
            span: Span::new(start, self.previous_end()),
            file: self.file,
            tags: Tags::new(),
        })])
    }

    // ---- bodies -------------------------------------------------------

    /// Parse `{ members }`, the current token being `{`
    fn struct_body(&mut self) -> PResult<(Vec<Member>, Span)> {
        let open = self.advance().span;
        let resume = self.current;
        self.floor = self.floor.max(open.end);
        let mut members = Vec::new();

        loop {
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::RightBrace => {
                    self.advance();
                    return Ok((members, Span::new(open.start, token.span.end)));
                }
                TokenKind::Eof => {
                    return Err(Failure {
                        error: Error::structural("struct body is never closed"),
                        offset: open.start,
                        resume: Some(resume),
                    });
                }
                TokenKind::Semicolon => {
                    self.advance();
                }
                TokenKind::Define { .. } => {
                    if let Some(define) = self.define() {
                        self.nested_defines.push(define);
                    }
                }
                _ => match self.member_declaration() {
                    Ok(parsed) => members.extend(parsed),
                    Err(failure) if failure.resume.is_some() => return Err(failure),
                    Err(failure) => {
                        self.errors.push((failure.error, failure.offset));
                        self.skip_member();
                    }
                },
            }
        }
    }

    /// Parse `{ entries }`, the current token being `{`
    fn enum_body(&mut self) -> PResult<(Vec<EnumEntry>, Span)> {
        let open = self.advance().span;
        let resume = self.current;
        self.floor = self.floor.max(open.end);
        let mut entries = Vec::new();

        loop {
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::RightBrace => {
                    self.advance();
                    return Ok((entries, Span::new(open.start, token.span.end)));
                }
                TokenKind::Eof => {
                    return Err(Failure {
                        error: Error::structural("enum body is never closed"),
                        offset: open.start,
                        resume: Some(resume),
                    });
                }
                TokenKind::Identifier(name) => {
                    let leading = self.claim_leading(token.span.start);
                    self.advance();
                    let value = if self.check_punct('=') {
                        self.advance();
                        Some(self.expression_until(&[','])?)
                    } else {
                        None
                    };
                    let end = self.previous_end();
                    if self.check_punct(',') {
                        self.advance();
                    }
                    let tags = self.finish_tags(&leading, self.previous_end());
                    entries.push(EnumEntry {
                        name: name.clone(),
                        value,
                        span: Span::new(token.span.start, end),
                        tags,
                    });
                }
                _ => {
                    self.errors.push((
                        Error::structural("unexpected token in enum body"),
                        token.span.start,
                    ));
                    self.advance();
                }
            }
        }
    }

    fn member_declaration(&mut self) -> PResult<Vec<Member>> {
        let start = self.peek().span.start;
        let leading = self.claim_leading(start);
        let ty = self.type_specifier()?;

        // Nested type declared without a member
        if matches!(ty, TypeSpec::Struct(_) | TypeSpec::Enum(_)) && self.check(&TokenKind::Semicolon) {
            self.advance();
            self.finish_tags(&leading, self.previous_end());
            return Ok(Vec::new());
        }

        let mut declarators = Vec::new();
        loop {
            declarators.push(self.declarator()?);
            if self.check(&TokenKind::Semicolon) {
                self.advance();
                break;
            }
            if self.check_punct(',') {
                self.advance();
                continue;
            }
            let last = declarators.last().map(|d| d.name.as_str()).unwrap_or("");
            return Err(self.fail(format!("expected `;` after member `{}`", last)));
        }

        let end = self.previous_end();
        let tags = self.finish_tags(&leading, end);
        let span = Span::new(start, end);

        Ok(declarators
            .into_iter()
            .map(|d| Member {
                name: d.name,
                ty: if d.pointer {
                    TypeSpec::Primitive(Primitive::Pointer)
                } else {
                    ty.clone()
                },
                array: d.array,
                bit_width: d.bit_width,
                span,
                tags: tags.clone(),
            })
            .collect())
    }

    fn type_specifier(&mut self) -> PResult<TypeSpec> {
        self.skip_qualifiers();
        let token = self.peek().clone();

        if token.is_word("union") {
            return Err(self.fail("union members are not supported"));
        }

        if token.is_word("struct") {
            self.advance();
            let mut packed = self.skip_attributes();
            let name = self.optional_name();
            packed |= self.skip_attributes();
            if self.check(&TokenKind::LeftBrace) {
                let (members, body) = self.struct_body()?;
                packed |= self.skip_attributes();
                return Ok(TypeSpec::Struct(Box::new(StructDef {
                    name,
                    packed,
                    members,
                    span: Span::new(token.span.start, body.end),
                    body,
                    file: self.file,
                    tags: Tags::new(),
                })));
            }
            return name
                .map(TypeSpec::StructRef)
                .ok_or_else(|| self.fail("expected struct name or body"));
        }

        if token.is_word("enum") {
            self.advance();
            let name = self.optional_name();
            if self.check(&TokenKind::LeftBrace) {
                let (entries, body) = self.enum_body()?;
                return Ok(TypeSpec::Enum(Box::new(EnumDef {
                    name: name.unwrap_or_default(),
                    entries,
                    span: Span::new(token.span.start, body.end),
                    body,
                    file: self.file,
                    tags: Tags::new(),
                })));
            }
            return name
                .map(TypeSpec::EnumRef)
                .ok_or_else(|| self.fail("expected enum name or body"));
        }

        // Consecutive identifiers; the last is the declarator name unless
        // a `*` follows them
        let mut end = self.current;
        while self.tokens[end].identifier().is_some() {
            end += 1;
        }
        if !self.tokens[end].is_punct('*') {
            end = end.saturating_sub(1).max(self.current);
        }
        let words: Vec<String> = self.tokens[self.current..end]
            .iter()
            .filter_map(|t| t.identifier())
            .filter(|w| !is_qualifier(w))
            .map(str::to_string)
            .collect();
        if words.is_empty() {
            return Err(self.fail("missing member type"));
        }
        self.current = end;

        if let Some(primitive) = Primitive::from_words(&words) {
            return Ok(TypeSpec::Primitive(primitive));
        }
        match words.as_slice() {
            [single] => Ok(TypeSpec::Named(single.clone())),
            _ => Err(Failure {
                error: Error::structural(format!("unknown type `{}`", words.join(" "))),
                offset: token.span.start,
                resume: None,
            }),
        }
    }

    fn declarator(&mut self) -> PResult<Declarator> {
        let mut pointer = false;
        while self.check_punct('*') {
            self.advance();
            pointer = true;
            self.skip_qualifiers();
        }
        let name = match self.peek().identifier() {
            Some(name) => name.to_string(),
            None => return Err(self.fail("expected member name")),
        };
        self.advance();
        if self.check_punct('(') {
            return Err(self.fail(format!("function member `{}` is not supported", name)));
        }
        let array = self.dimensions()?;
        let bit_width = if self.check_punct(':') {
            self.advance();
            Some(self.expression_until(&[','])?)
        } else {
            None
        };
        self.skip_attributes();
        Ok(Declarator {
            name,
            pointer,
            array,
            bit_width,
        })
    }

    /// Zero or more `[expr]` suffixes
    fn dimensions(&mut self) -> PResult<Vec<ConstExpr>> {
        let mut dims = Vec::new();
        while self.check_punct('[') {
            let open = self.advance().span;
            let start = open.end;
            let mut depth = 0usize;
            loop {
                let token = self.peek().clone();
                match &token.kind {
                    TokenKind::Punct(']') if depth == 0 => {
                        self.advance();
                        dims.push(ConstExpr::new(
                            &self.text[start..token.span.start],
                            Span::new(start, token.span.start),
                        ));
                        break;
                    }
                    TokenKind::Punct('[') | TokenKind::Punct('(') => depth += 1,
                    TokenKind::Punct(']') | TokenKind::Punct(')') => depth = depth.saturating_sub(1),
                    TokenKind::Semicolon | TokenKind::RightBrace | TokenKind::Eof => {
                        return Err(Failure {
                            error: Error::structural("unclosed `[` in array dimension"),
                            offset: open.start,
                            resume: None,
                        });
                    }
                    _ => {}
                }
                self.advance();
            }
        }
        Ok(dims)
    }

    /// Tokens up to one of `stops`, `;` or `}` at nesting depth zero
    fn expression_until(&mut self, stops: &[char]) -> PResult<ConstExpr> {
        let start = self.peek().span.start;
        let mut end = start;
        let mut depth = 0usize;
        loop {
            let token = self.peek();
            match &token.kind {
                TokenKind::Punct(c) if depth == 0 && stops.contains(c) => break,
                TokenKind::Semicolon | TokenKind::RightBrace | TokenKind::Eof if depth == 0 => break,
                TokenKind::Eof => break,
                TokenKind::Punct('(') | TokenKind::Punct('[') => depth += 1,
                TokenKind::Punct(')') | TokenKind::Punct(']') => depth = depth.saturating_sub(1),
                _ => {}
            }
            end = token.span.end;
            self.advance();
        }
        if end == start {
            return Err(self.fail("empty expression"));
        }
        Ok(ConstExpr::new(&self.text[start..end], Span::new(start, end)))
    }

    // ---- comment attachment ------------------------------------------

    /// Claim unattached comments between the floor and `start`
    fn claim_leading(&mut self, start: usize) -> Vec<usize> {
        while self.next_comment < self.comments.len()
            && self.comments[self.next_comment].span.start < self.floor
        {
            self.next_comment += 1;
        }
        let mut claimed = Vec::new();
        while self.next_comment < self.comments.len()
            && self.comments[self.next_comment].span.end <= start
        {
            if !self.claimed[self.next_comment] {
                self.claimed[self.next_comment] = true;
                claimed.push(self.next_comment);
            }
            self.next_comment += 1;
        }
        claimed
    }

    /// Claim comments on the line where a declaration ends, before the
    /// next token, then merge everything into tags
    fn finish_tags(&mut self, leading: &[usize], end: usize) -> Tags {
        let attached = self.finish_comments(leading, end);
        self.tags_of(&attached)
    }

    /// Return comments claimed for a construct that produced nothing
    fn release(&mut self, indices: &[usize]) {
        for &index in indices {
            self.claimed[index] = false;
        }
    }

    fn finish_comments(&mut self, leading: &[usize], end: usize) -> Vec<usize> {
        let next_token = self.peek().span.start;
        let mut attached = leading.to_vec();
        let mut floor = end;
        let mut index = self.next_comment;

        while index < self.comments.len() {
            let comment = &self.comments[index];
            if comment.span.start < end {
                index += 1;
                continue;
            }
            let same_line = !self.text[end..comment.span.start].contains('\n');
            if comment.span.start >= next_token || !same_line {
                break;
            }
            if !self.claimed[index] {
                self.claimed[index] = true;
                attached.push(index);
            }
            floor = comment.span.end;
            index += 1;
        }

        self.floor = self.floor.max(floor);
        attached
    }

    fn tags_of(&self, indices: &[usize]) -> Tags {
        let mut tags = Tags::new();
        let mut description = Vec::new();
        for &index in indices {
            let comment = &self.comments[index];
            tags.merge(&comment.entries);
            if let Some(text) = &comment.description {
                description.push(text.clone());
            }
        }
        if !tags.contains("desc") && !description.is_empty() {
            tags.insert("desc", Value::String(description.join(" ")));
        }
        tags
    }

    // ---- recovery and skipping ---------------------------------------

    /// Skip an unrecognised top-level construct: up to and including `;`
    /// at depth zero, or through a balanced `{ ... }` body
    fn skip_declaration(&mut self) {
        let mut depth = 0usize;
        while !self.is_at_end() {
            match &self.peek().kind {
                TokenKind::Semicolon if depth == 0 => {
                    self.advance();
                    break;
                }
                TokenKind::Define { .. } if depth == 0 => break,
                TokenKind::LeftBrace => depth += 1,
                TokenKind::RightBrace if depth == 0 => break,
                TokenKind::RightBrace => {
                    depth -= 1;
                    if depth == 0 {
                        self.advance();
                        break;
                    }
                }
                _ => {}
            }
            self.advance();
        }
        self.floor = self.floor.max(self.previous_end());
    }

    /// Skip the rest of a malformed member, stopping before the body's `}`
    fn skip_member(&mut self) {
        let mut depth = 0usize;
        while !self.is_at_end() {
            match &self.peek().kind {
                TokenKind::Semicolon if depth == 0 => {
                    self.advance();
                    break;
                }
                TokenKind::LeftBrace => depth += 1,
                TokenKind::RightBrace if depth == 0 => break,
                TokenKind::RightBrace => depth -= 1,
                _ => {}
            }
            self.advance();
        }
        self.floor = self.floor.max(self.previous_end());
    }

    /// Consume up to and including the `;` ending the current declaration
    fn finish_declaration(&mut self) {
        let mut depth = 0usize;
        while !self.is_at_end() {
            match &self.peek().kind {
                TokenKind::Semicolon if depth == 0 => {
                    self.advance();
                    return;
                }
                TokenKind::RightBrace if depth == 0 => return,
                TokenKind::Define { .. } if depth == 0 => return,
                TokenKind::LeftBrace => depth += 1,
                TokenKind::RightBrace => depth -= 1,
                _ => {}
            }
            self.advance();
        }
    }

    /// Skip a parenthesised group, the current token being `(`
    fn skip_balanced(&mut self) -> Vec<String> {
        let mut words = Vec::new();
        let mut depth = 0usize;
        while !self.is_at_end() {
            let token = self.advance().clone();
            match &token.kind {
                TokenKind::Punct('(') => depth += 1,
                TokenKind::Punct(')') => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        break;
                    }
                }
                TokenKind::Identifier(word) => words.push(word.clone()),
                TokenKind::Semicolon | TokenKind::LeftBrace | TokenKind::RightBrace => {
                    self.current -= 1;
                    break;
                }
                _ => {}
            }
        }
        words
    }

    /// Skip attribute syntax; true if any of it requests packing
    fn skip_attributes(&mut self) -> bool {
        let mut packed = false;
        loop {
            let Some(word) = self.peek().identifier() else {
                break;
            };
            match word {
                "PACKED" | "__packed" => {
                    self.advance();
                    packed = true;
                }
                "__attribute__" | "__attribute" | "__declspec" | "__aligned" | "ALIGNED" => {
                    self.advance();
                    if self.check_punct('(') {
                        let words = self.skip_balanced();
                        packed |= words.iter().any(|w| w == "packed" || w == "__packed__");
                    }
                }
                _ => break,
            }
        }
        packed
    }

    fn skip_qualifiers(&mut self) {
        loop {
            match self.peek().identifier() {
                Some(word) if is_qualifier(word) => {
                    self.advance();
                }
                Some(word) if is_attribute_word(word) => {
                    self.skip_attributes();
                }
                _ => break,
            }
        }
    }

    fn optional_name(&mut self) -> Option<String> {
        let name = self.peek().identifier()?;
        if is_attribute_word(name) {
            return None;
        }
        let name = name.to_string();
        self.advance();
        Some(name)
    }

    // ---- token helpers -------------------------------------------------

    fn fail(&self, message: impl Into<String>) -> Failure {
        Failure {
            error: Error::structural(message),
            offset: self.peek().span.start,
            resume: None,
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn previous_end(&self) -> usize {
        if self.current == 0 {
            0
        } else {
            self.tokens[self.current - 1].span.end
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn check_punct(&self, c: char) -> bool {
        self.peek().is_punct(c)
    }

    fn check_word(&self, word: &str) -> bool {
        self.peek().is_word(word)
    }
}

fn is_qualifier(word: &str) -> bool {
    matches!(
        word,
        "const" | "volatile" | "static" | "register" | "inline" | "__inline" | "__extension__"
    )
}

fn is_attribute_word(word: &str) -> bool {
    matches!(
        word,
        "__attribute__" | "__attribute" | "__declspec" | "__aligned" | "ALIGNED" | "PACKED" | "__packed"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{clean, CScanner};

    fn parse(source: &str) -> ParseOutput {
        let cleaned = clean(source);
        let tokens = CScanner::new(&cleaned.text).scan_tokens();
        CParser::new(tokens, &cleaned.text, &cleaned.comments, FileId(0)).parse()
    }

    fn struct_def(output: &ParseOutput, name: &str) -> StructDef {
        output
            .structures
            .iter()
            .find_map(|s| match s {
                Structure::StructDef(def) if def.name.as_deref() == Some(name) => Some(def.clone()),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_simple_struct() {
        let out = parse("struct Pkt1 { Pkt1Header hdr; uint8_t param1; };");
        assert!(out.errors.is_empty());
        let def = struct_def(&out, "Pkt1");
        assert_eq!(def.members.len(), 2);
        assert_eq!(def.members[0].ty, TypeSpec::Named("Pkt1Header".to_string()));
        assert_eq!(def.members[1].ty, TypeSpec::Primitive(Primitive::U8));
        assert!(!def.packed);
    }

    #[test]
    fn test_members_with_arrays_bits_and_pointers() {
        let out = parse(
            "typedef struct __attribute__((packed)) {\n\
             \x20 const uint16_t a : 4, b : 12;\n\
             \x20 unsigned char data[N][2];\n\
             \x20 uint8_t *ptr;\n\
             \x20 struct Inner in[COUNT];\n\
             } Outer;",
        );
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        let def = struct_def(&out, "Outer");
        assert!(def.packed);
        let names: Vec<&str> = def.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "data", "ptr", "in"]);
        assert_eq!(def.members[1].bit_width.as_ref().unwrap().text, "12");
        assert_eq!(def.members[2].array.len(), 2);
        assert_eq!(def.members[2].array[0].text, "N");
        assert_eq!(def.members[3].ty, TypeSpec::Primitive(Primitive::Pointer));
        assert_eq!(def.members[4].ty, TypeSpec::StructRef("Inner".to_string()));
    }

    #[test]
    fn test_typedef_with_tag_yields_both_names() {
        let out = parse("typedef struct tag_s { uint8_t x; } S_t;");
        assert!(struct_def(&out, "S_t").member("x").is_some());
        assert!(struct_def(&out, "tag_s").member("x").is_some());
    }

    #[test]
    fn test_nested_struct_is_owned_by_parent() {
        let out = parse("struct P { struct { uint8_t a; } inner; uint8_t b; };");
        assert_eq!(out.structures.len(), 1);
        let def = struct_def(&out, "P");
        match &def.members[0].ty {
            TypeSpec::Struct(inner) => assert_eq!(inner.members[0].name, "a"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_enum_refs_externs_and_defines() {
        let out = parse(
            "#define N_SENS (2 + 2)\n\
             enum Mode { IDLE, RUN = 4, STOP, };\n\
             enum Mode current;\n\
             extern const uint8_t table[N_SENS];\n\
             extern int helper(void);\n\
             struct Pkt;\n\
             struct Pkt pool[3];\n",
        );
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        let kinds: Vec<&str> = out
            .structures
            .iter()
            .map(|s| match s {
                Structure::Define(_) => "define",
                Structure::EnumDef(_) => "enum",
                Structure::EnumRef(_) => "enumref",
                Structure::Extern(_) => "extern",
                Structure::StructRef(_) => "structref",
                Structure::StructDef(_) => "struct",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["define", "enum", "enumref", "extern", "structref", "structref"]
        );
        match &out.structures[1] {
            Structure::EnumDef(def) => {
                assert_eq!(def.entries.len(), 3);
                assert_eq!(def.entries[1].value.as_ref().unwrap().text, "4");
            }
            _ => unreachable!(),
        }
        match &out.structures[3] {
            Structure::Extern(ext) => {
                assert_eq!(ext.name, "table");
                assert_eq!(ext.ty, "uint8_t");
                assert_eq!(ext.array[0].text, "N_SENS");
            }
            _ => unreachable!(),
        }
        match &out.structures[5] {
            Structure::StructRef(r) => {
                assert_eq!(r.variable.as_deref(), Some("pool"));
                assert_eq!(r.array[0].text, "3");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_functions_and_variables_are_skipped() {
        let out = parse(
            "static int counter = 0;\n\
             void reset(void) { counter = 0; if (x) { y(); } }\n\
             extern \"C\" {\n\
             struct A { uint8_t a; };\n\
             }\n",
        );
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(out.structures.len(), 1);
        assert!(struct_def(&out, "A").member("a").is_some());
    }

    #[test]
    fn test_recovers_from_malformed_member() {
        let out = parse("struct A { uint8_t ok; uint8_t ; uint16_t after; };\nstruct B { uint8_t b; };");
        assert_eq!(out.errors.len(), 1);
        assert!(matches!(out.errors[0].0, Error::StructuralError { .. }));
        let names: Vec<String> = struct_def(&out, "A").members.into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["ok", "after"]);
        assert!(struct_def(&out, "B").member("b").is_some());
    }

    #[test]
    fn test_unclosed_body_restarts_after_brace() {
        let out = parse("struct A { uint8_t a;\nstruct B { uint8_t b; };\n");
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].1, 9);
        assert!(struct_def(&out, "B").member("b").is_some());
    }

    #[test]
    fn test_union_member_and_stray_brace() {
        let out = parse("struct U { union { int a; float f; } v; uint8_t z; };\n}\n");
        assert_eq!(out.errors.len(), 2);
        assert_eq!(struct_def(&out, "U").members.len(), 1);
    }

    #[test]
    fn test_comment_association() {
        let out = parse(
            "/* calib: Status */\n\
             struct S {\n\
             \x20 // desc: first\n\
             \x20 uint8_t a;\n\
             \x20 uint8_t b; // unit: V\n\
             \x20 /* orphan */\n\
             };\n\
             enum E { X = 1, // text: ex\n\
             \x20 Y };\n",
        );
        let def = struct_def(&out, "S");
        assert_eq!(def.tags.text("calib").as_deref(), Some("Status"));
        assert_eq!(def.members[0].tags.text("desc").as_deref(), Some("first"));
        assert_eq!(def.members[1].tags.text("unit").as_deref(), Some("V"));
        assert!(!def.members[1].tags.contains("desc"));
        assert_eq!(out.attached, vec![true, true, true, false, true]);
        match &out.structures[1] {
            Structure::EnumDef(e) => {
                assert_eq!(e.entries[0].tags.text("text").as_deref(), Some("ex"));
                assert!(e.entries[1].tags.is_empty());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_standalone_comment_belongs_to_next_member() {
        let out = parse(
            "struct S {\n\
             \x20 uint8_t a;\n\
             \x20 /*{ unit: \"V\" }*/\n\
             \x20 uint8_t b;\n\
             \x20 uint8_t c; /*{ unit: \"A\" }*/ uint8_t d;\n\
             };\n",
        );
        let def = struct_def(&out, "S");
        assert!(def.members[0].tags.is_empty());
        assert_eq!(def.members[1].tags.text("unit").as_deref(), Some("V"));
        assert_eq!(def.members[2].tags.text("unit").as_deref(), Some("A"));
        assert!(def.members[3].tags.is_empty());
    }

    #[test]
    fn test_comments_of_skipped_constructs_stay_unattached() {
        let out = parse(
            "// desc: reset everything\n\
             void reset(void);\n\
             // unit: s\n\
             static int ticks; // trailing\n\
             // desc: kept\n\
             struct A { uint8_t a; };\n",
        );
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(out.attached, vec![false, false, false, true]);
        let def = struct_def(&out, "A");
        assert_eq!(def.tags.text("desc").as_deref(), Some("kept"));
        assert!(!def.tags.contains("unit"));
    }
}
