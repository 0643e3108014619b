use crate::span::Span;

use super::{
    align_up, BaseSpec, DeclContext, Field, LambdaInfo, Method, RecordDecl, RecordId, RecordKind,
    TemplateArg, TyId, TypeTable,
};

struct PendingField {
    name: Option<String>,
    ty: TyId,
    offset: Option<u64>,
    span: Span,
}

/// Incremental record definition with natural (C-like) layout unless
/// offsets or a size are given explicitly.
pub struct RecordBuilder<'t> {
    table: &'t mut TypeTable,
    target: Option<RecordId>,
    decl: RecordDecl,
    bases: Vec<(TyId, Option<u64>, Span)>,
    fields: Vec<PendingField>,
    layout: Option<(u64, u64)>,
}

impl<'t> RecordBuilder<'t> {
    pub(crate) fn new(table: &'t mut TypeTable, name: &str, target: Option<RecordId>) -> Self {
        Self {
            table,
            target,
            decl: RecordDecl {
                name: name.to_string(),
                kind: RecordKind::Struct,
                scope: Vec::new(),
                template_args: None,
                bases: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                size: 0,
                align: 1,
                trivially_copyable: true,
                trivially_destructible: true,
                standard_layout: true,
                complete: true,
                lambda: None,
                span: Span::dummy(),
            },
            bases: Vec::new(),
            fields: Vec::new(),
            layout: None,
        }
    }

    pub fn kind(mut self, kind: RecordKind) -> Self {
        self.decl.kind = kind;
        self
    }

    /// Append one enclosing namespace (outermost first).
    pub fn in_namespace(mut self, ns: &str) -> Self {
        self.decl.scope.push(DeclContext::Namespace(ns.to_string()));
        self
    }

    pub fn in_context(mut self, ctx: DeclContext) -> Self {
        self.decl.scope.push(ctx);
        self
    }

    pub fn scope(mut self, scope: Vec<DeclContext>) -> Self {
        self.decl.scope = scope;
        self
    }

    pub fn template(mut self, args: Vec<TemplateArg>) -> Self {
        self.decl.template_args = Some(args);
        self
    }

    pub fn base(mut self, ty: TyId) -> Self {
        self.bases.push((ty, None, Span::dummy()));
        self
    }

    pub fn base_at(mut self, ty: TyId, offset: Option<u64>, span: Span) -> Self {
        self.bases.push((ty, offset, span));
        self
    }

    pub fn field(self, name: &str, ty: TyId) -> Self {
        self.field_at(Some(name), ty, None, Span::dummy())
    }

    pub fn field_spanned(self, name: &str, ty: TyId, span: Span) -> Self {
        self.field_at(Some(name), ty, None, span)
    }

    pub fn field_at(
        mut self,
        name: Option<&str>,
        ty: TyId,
        offset: Option<u64>,
        span: Span,
    ) -> Self {
        self.fields.push(PendingField {
            name: name.map(str::to_string),
            ty,
            offset,
            span,
        });
        self
    }

    pub fn method(self, name: &str, params: Vec<TyId>) -> Self {
        self.push_method(Method {
            name: name.to_string(),
            params,
            is_call_operator: false,
            simd: false,
        })
    }

    pub fn call_operator(self, simd: bool) -> Self {
        self.push_method(Method {
            name: "operator()".to_string(),
            params: Vec::new(),
            is_call_operator: true,
            simd,
        })
    }

    pub fn push_method(mut self, method: Method) -> Self {
        self.decl.methods.push(method);
        self
    }

    pub fn non_trivially_copyable(mut self) -> Self {
        self.decl.trivially_copyable = false;
        self
    }

    pub fn non_trivially_destructible(mut self) -> Self {
        self.decl.trivially_destructible = false;
        self
    }

    pub fn non_standard_layout(mut self) -> Self {
        self.decl.standard_layout = false;
        self
    }

    pub fn incomplete(mut self) -> Self {
        self.decl.complete = false;
        self
    }

    pub fn lambda(mut self, captures_this: Option<Span>) -> Self {
        self.decl.lambda = Some(LambdaInfo { captures_this });
        self
    }

    pub fn span(mut self, span: Span) -> Self {
        self.decl.span = span;
        self
    }

    /// Explicit size and alignment; offsets not given explicitly are
    /// still laid out naturally.
    pub fn layout(mut self, size: u64, align: u64) -> Self {
        self.layout = Some((size, align));
        self
    }

    pub fn finish(self) -> TyId {
        let Self {
            table,
            target,
            mut decl,
            bases,
            fields,
            layout,
        } = self;

        let is_union = decl.kind == RecordKind::Union;
        let mut cursor = 0u64;
        let mut size = 0u64;
        let mut align = 1u64;

        for (ty, offset, span) in bases {
            let field_align = table.align_of(ty);
            let empty = is_empty_base(table, ty);
            let offset = offset.unwrap_or_else(|| align_up(cursor, field_align));
            if !empty {
                cursor = offset.saturating_add(table.size_of(ty));
            }
            size = size.max(cursor);
            align = align.max(field_align);
            decl.bases.push(BaseSpec { ty, offset, span });
        }

        for f in fields {
            let field_align = table.align_of(f.ty);
            let offset = match (f.offset, is_union) {
                (Some(o), _) => o,
                (None, true) => 0,
                (None, false) => align_up(cursor, field_align),
            };
            let end = offset.saturating_add(table.size_of(f.ty));
            if !is_union {
                cursor = end;
            }
            size = size.max(end);
            align = align.max(field_align);
            decl.fields.push(Field {
                name: f.name,
                ty: f.ty,
                offset,
                span: f.span,
            });
        }

        let (size, align) = layout.unwrap_or_else(|| {
            let size = align_up(size, align);
            (if size == 0 { 1 } else { size }, align)
        });
        decl.size = size;
        decl.align = align;

        table.install_record(target, decl)
    }
}

fn is_empty_base(table: &TypeTable, ty: TyId) -> bool {
    match table.as_record(ty) {
        Some(decl) => {
            decl.fields.is_empty()
                && decl.bases.iter().all(|b| is_empty_base(table, b.ty))
        }
        None => false,
    }
}
