//! Symbol model and the per-file symbol collector.
//!
//! Collection runs in two steps. `collect_file` walks one file's AST and
//! produces `FileSymbols` with file-local parent links, which is the
//! representation the cache stores. `SymbolTable::build` merges every
//! file's symbols into one table, detects duplicate fully-qualified names,
//! and resolves named types against the finished table.
//!
//! Fully-qualified names join nesting levels with `_`, which is exactly
//! the emitter's mangling, so a symbol's `fq_name` is also its C name.

use crate::ast::{
    Access, Decl, ExprId, FileId, FuncDecl, ScopeDecl, SourceFile, Span, TypeExpr, VarDecl,
};
use crate::diagnostics::{Category, Diagnostic};
use crate::types::{OverflowPolicy, Prim, Type};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Scope,
    Struct,
    Enum,
    Bitmap,
    Register,
    RegisterMember,
    Variable,
    Field,
    Const,
    Function,
    Method,
    EnumMember,
    BitmapField,
}

/// Function or method signature with resolved types.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub params: Vec<(String, Type)>,
    pub ret: Type,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    /// Underscore-joined qualified name; also the emitted C identifier.
    pub fq_name: String,
    pub kind: SymbolKind,
    pub parent: Option<SymbolId>,
    pub ty: Type,
    pub signature: Option<Signature>,
    /// Register members only.
    pub access: Option<Access>,
    /// Bitmap fields only.
    pub bit_offset: Option<u32>,
    pub bit_width: Option<u32>,
    /// Registers: base address. Register members: absolute address.
    pub address: Option<u64>,
    /// Variables: declared `atomic`.
    pub atomic: bool,
    /// Variables: explicit `clamp`/`wrap` annotation.
    pub policy: Option<OverflowPolicy>,
    /// Enum members: explicit tag expression, evaluated on demand.
    pub value_expr: Option<ExprId>,
    pub file: FileId,
    pub span: Span,
}

/// Symbols of a single file, with parents as indices into the same vector.
/// This is what the cache memoises; global ids are assigned at merge time.
#[derive(Debug, Clone, Default)]
pub struct FileSymbols {
    pub symbols: Vec<Symbol>,
}

/// Whole-unit symbol table.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_fq: HashMap<String, SymbolId>,
    by_short: HashMap<String, Vec<SymbolId>>,
}

impl SymbolTable {
    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn lookup_fq(&self, fq: &str) -> Option<&Symbol> {
        self.by_fq.get(fq).map(|id| self.get(*id))
    }

    /// All symbols sharing a short name, for disambiguation.
    pub fn lookup_short(&self, name: &str) -> &[SymbolId] {
        self.by_short.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Direct children of a container symbol, in declaration order.
    pub fn children(&self, parent: SymbolId) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(move |s| s.parent == Some(parent))
    }

    /// Resolve a dotted source name starting from an enclosing symbol,
    /// walking outward through parents to the top level.
    pub fn resolve_named(&self, dotted: &str, from: Option<SymbolId>) -> Option<SymbolId> {
        let mangled = dotted.replace('.', "_");
        let mut scope = from;
        loop {
            let candidate = match scope {
                Some(id) => format!("{}_{}", self.get(id).fq_name, mangled),
                None => mangled.clone(),
            };
            if let Some(&id) = self.by_fq.get(&candidate) {
                return Some(id);
            }
            scope = match scope {
                Some(id) => self.get(id).parent,
                None => return None,
            };
        }
    }

    /// Merge per-file symbols into one table, rejecting duplicate
    /// fully-qualified names, then resolve named types.
    pub fn build(files: &[(&SourceFile, &FileSymbols)]) -> (SymbolTable, Vec<Diagnostic>) {
        let mut table = SymbolTable::default();
        let mut diagnostics = Vec::new();

        for (source, file_symbols) in files {
            let base = table.symbols.len() as u32;
            for local in &file_symbols.symbols {
                let mut symbol = local.clone();
                symbol.id = SymbolId(base + symbol.id.0);
                symbol.parent = symbol.parent.map(|p| SymbolId(base + p.0));
                if let Some(&existing) = table.by_fq.get(&symbol.fq_name) {
                    let first = table.get(existing);
                    diagnostics.push(
                        Diagnostic::error(
                            Category::SymbolDuplicate,
                            format!(
                                "'{}' is defined more than once in this compilation unit",
                                symbol.fq_name.replace('_', ".")
                            ),
                        )
                        .at(&source.path, symbol.span)
                        .with_note(format!(
                            "first defined at {}:{}",
                            first.span.line, first.span.column
                        )),
                    );
                    // The first definition keeps the name; the duplicate
                    // still occupies its slot so ids stay positional.
                } else {
                    table.by_fq.insert(symbol.fq_name.clone(), symbol.id);
                    table
                        .by_short
                        .entry(symbol.name.clone())
                        .or_default()
                        .push(symbol.id);
                }
                table.symbols.push(symbol);
            }
        }

        table.resolve_types(files, &mut diagnostics);
        (table, diagnostics)
    }

    /// Resolve `Type::Named` placeholders (dotted source names) to their
    /// canonical mangled names now that every symbol is registered.
    fn resolve_types(
        &mut self,
        files: &[(&SourceFile, &FileSymbols)],
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let paths: HashMap<FileId, std::path::PathBuf> = files
            .iter()
            .map(|(source, _)| (source.file, source.path.clone()))
            .collect();

        for idx in 0..self.symbols.len() {
            let parent = self.symbols[idx].parent;
            let file = self.symbols[idx].file;
            let span = self.symbols[idx].span;

            let ty = self.symbols[idx].ty.clone();
            let resolved = self.resolve_type(ty, parent, &mut |dotted| {
                diagnostics.push(
                    Diagnostic::error(
                        Category::UnresolvedReference,
                        format!("unknown type '{}'", dotted),
                    )
                    .at(paths.get(&file).cloned().unwrap_or_default(), span),
                );
            });
            self.symbols[idx].ty = resolved;

            if let Some(mut signature) = self.symbols[idx].signature.clone() {
                signature.ret = self.resolve_type(signature.ret, parent, &mut |dotted| {
                    diagnostics.push(
                        Diagnostic::error(
                            Category::UnresolvedReference,
                            format!("unknown type '{}'", dotted),
                        )
                        .at(paths.get(&file).cloned().unwrap_or_default(), span),
                    );
                });
                signature.params = signature
                    .params
                    .into_iter()
                    .map(|(name, ty)| {
                        let ty = self.resolve_type(ty, parent, &mut |dotted| {
                            diagnostics.push(
                                Diagnostic::error(
                                    Category::UnresolvedReference,
                                    format!("unknown type '{}'", dotted),
                                )
                                .at(paths.get(&file).cloned().unwrap_or_default(), span),
                            );
                        });
                        (name, ty)
                    })
                    .collect();
                self.symbols[idx].signature = Some(signature);
            }
        }
    }

    fn resolve_type(
        &self,
        ty: Type,
        from: Option<SymbolId>,
        missing: &mut dyn FnMut(&str),
    ) -> Type {
        match ty {
            Type::Named { fq } => {
                // Search outward from the declaring symbol's parent chain,
                // so an inner `Config` shadows a top-level one.
                match self.resolve_named(&fq.replace('_', "."), from) {
                    Some(id) => {
                        let target = self.get(id);
                        match target.kind {
                            SymbolKind::Bitmap => Type::Bitmap {
                                fq: target.fq_name.clone(),
                                backing: target.ty.prim().unwrap_or(Prim::U32),
                            },
                            _ => Type::Named { fq: target.fq_name.clone() },
                        }
                    }
                    None => {
                        missing(&fq);
                        Type::Unknown
                    }
                }
            }
            Type::Ptr(inner) => Type::Ptr(Box::new(self.resolve_type(*inner, from, missing))),
            Type::Array { elem, size } => Type::Array {
                elem: Box::new(self.resolve_type(*elem, from, missing)),
                size,
            },
            other => other,
        }
    }
}

/// Lower a syntactic type to a half-resolved semantic type. Named types
/// keep their dotted source spelling until `SymbolTable::build` resolves
/// them against the full table.
pub fn lower_type_expr(ty: &TypeExpr) -> Type {
    match ty {
        TypeExpr::Prim(p) => Type::Prim(*p),
        TypeExpr::Str { capacity } => Type::Str { capacity: *capacity },
        TypeExpr::Named { segments } => Type::Named { fq: segments.join("_") },
        TypeExpr::Ptr(inner) => Type::Ptr(Box::new(lower_type_expr(inner))),
        TypeExpr::Array { elem, size: _ } => Type::Array {
            elem: Box::new(lower_type_expr(elem)),
            // Sizes are expression ids; the checker folds them on demand.
            size: None,
        },
    }
}

/// Collect the symbols of one file.
pub fn collect_file(source: &SourceFile) -> (FileSymbols, Vec<Diagnostic>) {
    let mut collector = Collector {
        source,
        symbols: Vec::new(),
        diagnostics: Vec::new(),
    };
    for decl in &source.decls {
        collector.collect_decl(decl, None, "");
    }
    (
        FileSymbols { symbols: collector.symbols },
        collector.diagnostics,
    )
}

struct Collector<'a> {
    source: &'a SourceFile,
    symbols: Vec<Symbol>,
    diagnostics: Vec<Diagnostic>,
}

impl Collector<'_> {
    fn alloc(&mut self, symbol: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        let mut symbol = symbol;
        symbol.id = id;
        self.symbols.push(symbol);
        id
    }

    fn base_symbol(&self, name: &str, prefix: &str, kind: SymbolKind, span: Span) -> Symbol {
        let fq_name = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}_{}", prefix, name)
        };
        Symbol {
            id: SymbolId(0),
            name: name.to_string(),
            fq_name,
            kind,
            parent: None,
            ty: Type::Unknown,
            signature: None,
            access: None,
            bit_offset: None,
            bit_width: None,
            address: None,
            atomic: false,
            policy: None,
            value_expr: None,
            file: self.source.file,
            span,
        }
    }

    fn error(&mut self, category: Category, span: Span, message: String) {
        self.diagnostics
            .push(Diagnostic::error(category, message).at(&self.source.path, span));
    }

    fn collect_decl(&mut self, decl: &Decl, parent: Option<SymbolId>, prefix: &str) {
        match decl {
            Decl::Scope(scope) => self.collect_scope(scope, parent, prefix),
            Decl::Struct(s) => {
                let mut symbol = self.base_symbol(&s.name, prefix, SymbolKind::Struct, s.span);
                symbol.parent = parent;
                let struct_fq = symbol.fq_name.clone();
                let id = self.alloc(symbol);
                for field in &s.fields {
                    let mut field_symbol =
                        self.base_symbol(&field.name, &struct_fq, SymbolKind::Field, field.span);
                    field_symbol.parent = Some(id);
                    field_symbol.ty = lower_type_expr(&field.ty);
                    self.alloc(field_symbol);
                }
            }
            Decl::Enum(e) => {
                let mut symbol = self.base_symbol(&e.name, prefix, SymbolKind::Enum, e.span);
                symbol.parent = parent;
                let enum_fq = symbol.fq_name.clone();
                let id = self.alloc(symbol);
                for member in &e.members {
                    let mut member_symbol = self.base_symbol(
                        &member.name,
                        &enum_fq,
                        SymbolKind::EnumMember,
                        member.span,
                    );
                    member_symbol.parent = Some(id);
                    member_symbol.ty = Type::Named { fq: enum_fq.clone() };
                    member_symbol.value_expr = member.value;
                    self.alloc(member_symbol);
                }
            }
            Decl::Bitmap(b) => self.collect_bitmap(b, parent, prefix),
            Decl::Register(r) => self.collect_register(r, parent, prefix),
            Decl::Const(c) => {
                let mut symbol = self.base_symbol(&c.name, prefix, SymbolKind::Const, c.span);
                symbol.parent = parent;
                symbol.ty = lower_type_expr(&c.ty);
                symbol.value_expr = Some(c.init);
                self.alloc(symbol);
            }
            Decl::Var(v) => self.collect_var(v, parent, prefix),
            Decl::Func(f) => self.collect_func(f, parent, prefix),
            Decl::Include(_) | Decl::Comment(_) => {}
        }
    }

    fn collect_scope(&mut self, scope: &ScopeDecl, parent: Option<SymbolId>, prefix: &str) {
        let mut symbol = self.base_symbol(&scope.name, prefix, SymbolKind::Scope, scope.span);
        symbol.parent = parent;
        let scope_fq = symbol.fq_name.clone();
        let id = self.alloc(symbol);
        for decl in &scope.decls {
            self.collect_decl(decl, Some(id), &scope_fq);
        }
    }

    fn collect_var(&mut self, var: &VarDecl, parent: Option<SymbolId>, prefix: &str) {
        let mut symbol = self.base_symbol(&var.name, prefix, SymbolKind::Variable, var.span);
        symbol.parent = parent;
        symbol.ty = lower_type_expr(&var.ty);
        symbol.atomic = var.atomic;
        symbol.policy = var.policy;
        if var.atomic {
            match &symbol.ty {
                Type::Prim(p) if p.is_integer() && p.bits() <= 32 => {}
                _ => self.error(
                    Category::TypeMismatch,
                    var.span,
                    format!(
                        "atomic variables must be integers of at most 32 bits, got '{}'",
                        symbol.ty.describe()
                    ),
                ),
            }
        }
        self.alloc(symbol);
    }

    fn collect_func(&mut self, func: &FuncDecl, parent: Option<SymbolId>, prefix: &str) {
        let kind = if parent.is_some() {
            SymbolKind::Method
        } else {
            SymbolKind::Function
        };
        let mut symbol = self.base_symbol(&func.name, prefix, kind, func.span);
        symbol.parent = parent;
        let ret = lower_type_expr(&func.ret);
        if ret == Type::Prim(Prim::Isr) && !func.params.is_empty() {
            self.error(
                Category::TypeMismatch,
                func.span,
                format!("ISR '{}' must not take parameters", func.name),
            );
        }
        let params = func
            .params
            .iter()
            .map(|p| (p.name.clone(), lower_type_expr(&p.ty)))
            .collect();
        symbol.signature = Some(Signature { params, ret });
        self.alloc(symbol);
    }

    fn collect_bitmap(
        &mut self,
        bitmap: &crate::ast::BitmapDecl,
        parent: Option<SymbolId>,
        prefix: &str,
    ) {
        let mut symbol = self.base_symbol(&bitmap.name, prefix, SymbolKind::Bitmap, bitmap.span);
        symbol.parent = parent;
        symbol.ty = Type::Prim(bitmap.backing);
        let bitmap_fq = symbol.fq_name.clone();
        let id = self.alloc(symbol);

        // Field offsets run left-to-right from bit 0 of the backing integer.
        let mut offset = 0u32;
        let capacity = bitmap.backing.bits();
        for field in &bitmap.fields {
            if field.width == 0 {
                self.error(
                    Category::TypeMismatch,
                    field.span,
                    format!("bitmap field '{}' must be at least one bit wide", field.name),
                );
                continue;
            }
            if offset + field.width > capacity {
                self.error(
                    Category::TypeMismatch,
                    field.span,
                    format!(
                        "bitmap '{}' overflows its {}-bit backing type at field '{}'",
                        bitmap.name, capacity, field.name
                    ),
                );
                continue;
            }
            let mut field_symbol =
                self.base_symbol(&field.name, &bitmap_fq, SymbolKind::BitmapField, field.span);
            field_symbol.parent = Some(id);
            field_symbol.ty = Type::Prim(bitmap.backing);
            field_symbol.bit_offset = Some(offset);
            field_symbol.bit_width = Some(field.width);
            self.alloc(field_symbol);
            offset += field.width;
        }
    }

    fn collect_register(
        &mut self,
        register: &crate::ast::RegisterDecl,
        parent: Option<SymbolId>,
        prefix: &str,
    ) {
        let mut symbol =
            self.base_symbol(&register.name, prefix, SymbolKind::Register, register.span);
        symbol.parent = parent;
        symbol.address = Some(register.address);
        let register_fq = symbol.fq_name.clone();
        let id = self.alloc(symbol);

        // Members are laid out sequentially; each is as wide as its type.
        let mut offset = 0u64;
        for member in &register.members {
            let ty = lower_type_expr(&member.ty);
            let size = match ty.prim() {
                Some(p) if p.is_integer() => (p.bits() / 8) as u64,
                _ => {
                    self.error(
                        Category::TypeMismatch,
                        member.span,
                        format!(
                            "register member '{}' must have a fixed-width integer type",
                            member.name
                        ),
                    );
                    continue;
                }
            };
            let mut member_symbol = self.base_symbol(
                &member.name,
                &register_fq,
                SymbolKind::RegisterMember,
                member.span,
            );
            member_symbol.parent = Some(id);
            member_symbol.ty = ty;
            member_symbol.access = Some(member.access);
            member_symbol.address = Some(register.address + offset);
            self.alloc(member_symbol);
            offset += size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use std::path::Path;

    fn collect(source: &str) -> (SourceFile, FileSymbols, Vec<Diagnostic>) {
        let (file, parse_diags) = parse(source, Path::new("test.cnx"), FileId(0));
        assert!(parse_diags.is_empty(), "parse errors: {:?}", parse_diags);
        let (symbols, diags) = collect_file(&file);
        (file, symbols, diags)
    }

    fn build_table(source: &str) -> (SymbolTable, Vec<Diagnostic>) {
        let (file, symbols, mut diags) = collect(source);
        let (table, build_diags) = SymbolTable::build(&[(&file, &symbols)]);
        diags.extend(build_diags);
        (table, diags)
    }

    #[test]
    fn test_scope_member_mangling() {
        let (table, diags) = build_table(
            "scope Counter {\n    u32 count <- 0;\n    void increment() {\n        this.count +<- 1;\n    }\n}\n",
        );
        assert!(diags.is_empty());
        let count = table.lookup_fq("Counter_count").expect("count symbol");
        assert_eq!(count.kind, SymbolKind::Variable);
        assert_eq!(count.ty, Type::Prim(Prim::U32));
        let inc = table.lookup_fq("Counter_increment").expect("increment symbol");
        assert_eq!(inc.kind, SymbolKind::Method);
    }

    #[test]
    fn test_nested_scope_underscore_count() {
        // Eight levels of nesting: mangled name joins with 7 underscores.
        let source = "scope A { scope B { scope C { scope D { scope E { scope F { scope G { scope H { u8 x <- 0; } } } } } } } }\n";
        let (table, diags) = build_table(source);
        assert!(diags.is_empty());
        let x = table.lookup_fq("A_B_C_D_E_F_G_H_x").expect("deep symbol");
        assert_eq!(x.fq_name.matches('_').count(), 8);
        let h = table.lookup_fq("A_B_C_D_E_F_G_H").expect("deep scope");
        assert_eq!(h.fq_name.matches('_').count(), 7);
    }

    #[test]
    fn test_register_member_addresses_and_access() {
        let (table, diags) = build_table(
            "register UART0 @ 0x40001000 {\n    rw u32 data;\n    ro u32 status;\n    w1c u8 flags;\n}\n",
        );
        assert!(diags.is_empty());
        let data = table.lookup_fq("UART0_data").unwrap();
        assert_eq!(data.access, Some(Access::Rw));
        assert_eq!(data.address, Some(0x4000_1000));
        let status = table.lookup_fq("UART0_status").unwrap();
        assert_eq!(status.access, Some(Access::Ro));
        assert_eq!(status.address, Some(0x4000_1004));
        let flags = table.lookup_fq("UART0_flags").unwrap();
        assert_eq!(flags.access, Some(Access::W1c));
        assert_eq!(flags.address, Some(0x4000_1008));
    }

    #[test]
    fn test_bitmap_field_offsets() {
        let (table, diags) =
            build_table("bitmap Flags : u8 {\n    ready : 1;\n    error : 1;\n    mode : 3;\n}\n");
        assert!(diags.is_empty());
        let ready = table.lookup_fq("Flags_ready").unwrap();
        assert_eq!((ready.bit_offset, ready.bit_width), (Some(0), Some(1)));
        let mode = table.lookup_fq("Flags_mode").unwrap();
        assert_eq!((mode.bit_offset, mode.bit_width), (Some(2), Some(3)));
    }

    #[test]
    fn test_bitmap_overflow_detected() {
        let (_, diags) = build_table("bitmap Flags : u8 {\n    a : 6;\n    b : 3;\n}\n");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("overflows"));
    }

    #[test]
    fn test_max_width_bitmap_all_fields_fit() {
        let fields: String = (0..64).map(|i| format!("    b{} : 1;\n", i)).collect();
        let source = format!("bitmap Wide : u64 {{\n{}}}\n", fields);
        let (table, diags) = build_table(&source);
        assert!(diags.is_empty());
        let last = table.lookup_fq("Wide_b63").unwrap();
        assert_eq!(last.bit_offset, Some(63));
    }

    #[test]
    fn test_duplicate_fq_name_is_error() {
        let (_, diags) = build_table("scope A {\n    u8 x <- 0;\n    u16 x <- 0;\n}\n");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("more than once"));
    }

    #[test]
    fn test_same_short_name_in_different_scopes_ok() {
        let (table, diags) =
            build_table("scope A {\n    u8 x <- 0;\n}\nscope B {\n    u8 x <- 0;\n}\n");
        assert!(diags.is_empty());
        assert_eq!(table.lookup_short("x").len(), 2);
    }

    #[test]
    fn test_named_type_resolution_within_scope() {
        let (table, diags) = build_table(
            "scope Serial {\n    struct Config {\n        i32 value;\n    }\n    Config current;\n}\n",
        );
        assert!(diags.is_empty());
        let current = table.lookup_fq("Serial_current").unwrap();
        assert_eq!(current.ty, Type::Named { fq: "Serial_Config".to_string() });
    }

    #[test]
    fn test_unresolved_named_type_reported() {
        let (_, diags) = build_table("Missing thing;\n");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("unknown type 'Missing'"));
    }

    #[test]
    fn test_bitmap_typed_variable_resolves_to_bitmap_type() {
        let (table, diags) =
            build_table("bitmap Flags : u16 {\n    ready : 1;\n}\nFlags current;\n");
        assert!(diags.is_empty());
        let current = table.lookup_fq("current").unwrap();
        assert_eq!(
            current.ty,
            Type::Bitmap { fq: "Flags".to_string(), backing: Prim::U16 }
        );
    }

    #[test]
    fn test_atomic_requires_narrow_integer() {
        let (_, diags) = build_table("atomic u64 wide <- 0;\n");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("atomic"));
    }

    #[test]
    fn test_isr_with_params_rejected() {
        let (_, diags) = build_table("ISR handler(u8 x) {\n}\n");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("ISR"));
    }
}
