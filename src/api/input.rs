//! JSON unit descriptions.
//!
//! A unit lists the records of the translation unit, the functions
//! reachable from device code and the kernel launch sites. Records and
//! functions are referred to by a string `id` unique within the unit.
//!
//! ```json
//! {
//!   "records": [
//!     { "id": "K", "name": "K", "scope": [{ "namespace": "app" }],
//!       "lambda": {}, "fields": [{ "name": "n", "ty": { "scalar": "i32" } }] }
//!   ],
//!   "functions": [{ "id": "body", "name": "operator()" }],
//!   "launches": [{ "name": { "record": "K" }, "object": { "record": "K" },
//!                  "body": "body", "kind": "parallel_for" }]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;

use crate::callgraph::attrs::KernelAttr;
use crate::callgraph::{
    CallSite, Callee, FnId, FunctionDecl, FunctionTable, Redecl, RttiKind, RttiUse,
};
use crate::config::TargetConfig;
use crate::error::{Error, Result};
use crate::span::{Span, Spanned};
use crate::types::{
    AddrSpace, DeclContext, Method, RecordKind, Scalar, TemplateArg, TyId, TypeTable,
};

use super::{InvocationKind, LaunchSite};

/// A loaded compilation unit.
#[derive(Debug)]
pub struct Unit {
    pub types: TypeTable,
    pub functions: FunctionTable,
    pub launches: Vec<LaunchSite>,
    /// Source file the spans refer to, if the unit names one.
    pub source_file: Option<String>,
    records: BTreeMap<String, TyId>,
    fn_ids: BTreeMap<String, FnId>,
}

impl Unit {
    pub fn load(path: &Path, target: &TargetConfig) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json(&content, &path.display().to_string(), target)
    }

    pub fn from_json(content: &str, origin: &str, target: &TargetConfig) -> Result<Self> {
        let raw: RawUnit = serde_json::from_str(content).map_err(|e| Error::json(origin, e))?;
        Loader::new(target).load(raw)
    }

    /// Type of the record declared with `id`.
    pub fn record(&self, id: &str) -> Option<TyId> {
        self.records.get(id).copied()
    }

    pub fn function(&self, id: &str) -> Option<FnId> {
        self.fn_ids.get(id).copied()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawUnit {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    records: Vec<RawRecord>,
    #[serde(default)]
    functions: Vec<RawFunction>,
    #[serde(default)]
    launches: Vec<RawLaunch>,
}

/// Reference to a type from inside the unit.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TypeRef {
    Void,
    Scalar(Scalar),
    Vector {
        elem: Scalar,
        lanes: u32,
    },
    Pointer {
        to: Box<TypeRef>,
        #[serde(default)]
        space: AddrSpace,
    },
    Reference(Box<TypeRef>),
    Array {
        of: Box<TypeRef>,
        len: u64,
    },
    Vla(Box<TypeRef>),
    Record(String),
    Opaque(String),
}

impl TypeRef {
    /// Records this type contains by value.
    fn embedded_record(&self) -> Option<&str> {
        match self {
            TypeRef::Record(id) => Some(id),
            TypeRef::Array { of, .. } | TypeRef::Vla(of) => of.embedded_record(),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawTemplateArg {
    Type(TypeRef),
    Int(i64),
    Pack(Vec<RawTemplateArg>),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRecord {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    kind: RecordKind,
    #[serde(default)]
    scope: Vec<DeclContext>,
    #[serde(default)]
    template: Option<Vec<RawTemplateArg>>,
    #[serde(default)]
    bases: Vec<RawBase>,
    #[serde(default)]
    fields: Vec<RawField>,
    #[serde(default)]
    methods: Vec<RawMethod>,
    #[serde(default)]
    layout: Option<RawLayout>,
    #[serde(default = "yes")]
    trivially_copyable: bool,
    #[serde(default = "yes")]
    trivially_destructible: bool,
    #[serde(default = "yes")]
    standard_layout: bool,
    #[serde(default = "yes")]
    complete: bool,
    #[serde(default)]
    lambda: Option<RawLambda>,
    #[serde(default)]
    span: Span,
}

fn yes() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBase {
    ty: TypeRef,
    #[serde(default)]
    offset: Option<u64>,
    #[serde(default)]
    span: Span,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawField {
    #[serde(default)]
    name: Option<String>,
    ty: TypeRef,
    #[serde(default)]
    offset: Option<u64>,
    #[serde(default)]
    span: Span,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMethod {
    name: String,
    #[serde(default)]
    params: Vec<TypeRef>,
    #[serde(default)]
    call_operator: bool,
    #[serde(default)]
    simd: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLayout {
    size: u64,
    align: u64,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawLambda {
    #[serde(default)]
    captures_this: Option<Span>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFunction {
    id: String,
    name: String,
    #[serde(default)]
    scope: Vec<DeclContext>,
    #[serde(default)]
    span: Span,
    #[serde(default = "yes")]
    defined: bool,
    #[serde(default)]
    external: bool,
    #[serde(default)]
    builtin: bool,
    #[serde(default)]
    simd: bool,
    /// Attributes written directly on the single declaration.
    #[serde(default)]
    attrs: Vec<RawAttr>,
    #[serde(default)]
    redecls: Vec<RawRedecl>,
    #[serde(default)]
    calls: Vec<RawCall>,
    #[serde(default)]
    rtti: Vec<RawRtti>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRedecl {
    #[serde(default)]
    span: Span,
    #[serde(default)]
    attrs: Vec<RawAttr>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAttr {
    name: String,
    #[serde(default)]
    args: Vec<i64>,
    #[serde(default)]
    span: Span,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawCallee {
    Direct(String),
    Virtual(String),
    Indirect,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCall {
    callee: RawCallee,
    #[serde(default)]
    span: Span,
    #[serde(default)]
    constexpr: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRtti {
    kind: RawRttiKind,
    #[serde(default)]
    span: Span,
    #[serde(default)]
    constexpr: bool,
}

#[derive(Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawRttiKind {
    Typeid,
    DynamicCast,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLaunch {
    name: TypeRef,
    object: TypeRef,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    kind: InvocationKind,
    #[serde(default)]
    span: Span,
}

struct Loader {
    types: TypeTable,
    records: BTreeMap<String, TyId>,
}

impl Loader {
    fn new(target: &TargetConfig) -> Self {
        Self {
            types: TypeTable::with_pointer_size(target.pointer_size()),
            records: BTreeMap::new(),
        }
    }

    fn load(mut self, raw: RawUnit) -> Result<Unit> {
        for r in &raw.records {
            if self.records.contains_key(&r.id) {
                return Err(Error::Unit(format!("duplicate record id '{}'", r.id)));
            }
            let ty = self.types.declare(&r.name);
            self.records.insert(r.id.clone(), ty);
        }

        let by_id: BTreeMap<&str, &RawRecord> =
            raw.records.iter().map(|r| (r.id.as_str(), r)).collect();
        for id in definition_order(&raw.records, &by_id)? {
            self.define(by_id[id])?;
        }

        let (functions, fn_ids) = self.load_functions(&raw.functions)?;

        let mut launches = Vec::with_capacity(raw.launches.len());
        for l in &raw.launches {
            let body = match &l.body {
                Some(id) => Some(lookup_fn(&fn_ids, id)?),
                None => None,
            };
            launches.push(LaunchSite {
                name_type: self.resolve(&l.name)?,
                kernel_object: self.resolve(&l.object)?,
                body,
                kind: l.kind,
                span: l.span,
            });
        }

        Ok(Unit {
            types: self.types,
            functions,
            launches,
            source_file: raw.source,
            records: self.records,
            fn_ids,
        })
    }

    fn record_ty(&self, id: &str) -> Result<TyId> {
        self.records
            .get(id)
            .copied()
            .ok_or_else(|| Error::Unit(format!("unknown record '{}'", id)))
    }

    fn resolve(&mut self, r: &TypeRef) -> Result<TyId> {
        Ok(match r {
            TypeRef::Void => self.types.void(),
            TypeRef::Scalar(s) => self.types.scalar(*s),
            TypeRef::Vector { elem, lanes } => self.types.vector(*elem, *lanes),
            TypeRef::Pointer { to, space } => {
                let pointee = self.resolve(to)?;
                self.types.pointer(pointee, *space)
            }
            TypeRef::Reference(to) => {
                let pointee = self.resolve(to)?;
                self.types.reference(pointee)
            }
            TypeRef::Array { of, len } => {
                let elem = self.resolve(of)?;
                if self.types.size_of(elem).checked_mul(*len).is_none() {
                    return Err(Error::Unit(format!(
                        "array of {} '{}' elements is too large",
                        len,
                        self.types.display(elem)
                    )));
                }
                self.types.array(elem, *len)
            }
            TypeRef::Vla(of) => {
                let elem = self.resolve(of)?;
                self.types.vla(elem)
            }
            TypeRef::Record(id) => self.record_ty(id)?,
            TypeRef::Opaque(name) => self.types.opaque(name),
        })
    }

    fn template_args(&mut self, args: &[RawTemplateArg]) -> Result<Vec<TemplateArg>> {
        args.iter()
            .map(|a| {
                Ok(match a {
                    RawTemplateArg::Type(t) => TemplateArg::Type(self.resolve(t)?),
                    RawTemplateArg::Int(n) => TemplateArg::Integral(*n),
                    RawTemplateArg::Pack(items) => TemplateArg::Pack(self.template_args(items)?),
                })
            })
            .collect()
    }

    fn define(&mut self, r: &RawRecord) -> Result<()> {
        let ty = self.record_ty(&r.id)?;
        let template = match &r.template {
            Some(args) => Some(self.template_args(args)?),
            None => None,
        };
        let mut bases = Vec::with_capacity(r.bases.len());
        for b in &r.bases {
            bases.push((self.resolve(&b.ty)?, b.offset, b.span));
        }
        let mut fields = Vec::with_capacity(r.fields.len());
        for f in &r.fields {
            fields.push((f.name.as_deref(), self.resolve(&f.ty)?, f.offset, f.span));
        }
        let mut methods = Vec::with_capacity(r.methods.len());
        for m in &r.methods {
            let params = m
                .params
                .iter()
                .map(|p| self.resolve(p))
                .collect::<Result<Vec<_>>>()?;
            methods.push(Method {
                name: m.name.clone(),
                params,
                is_call_operator: m.call_operator,
                simd: m.simd,
            });
        }

        // Upper bound on the laid-out size, so the layout cannot overflow.
        let bound = bases
            .iter()
            .map(|(ty, offset, _)| (*ty, *offset))
            .chain(fields.iter().map(|(_, ty, offset, _)| (*ty, *offset)))
            .try_fold(0u64, |acc, (ty, offset)| {
                let extent = self.types.size_of(ty).checked_add(self.types.align_of(ty))?;
                match offset {
                    Some(at) => at.checked_add(extent).map(|end| end.max(acc)),
                    None => acc.checked_add(extent),
                }
            });
        if bound.is_none() {
            return Err(Error::Unit(format!("record '{}' is too large", r.id)));
        }

        let Some(mut b) = self.types.define(ty) else {
            return Err(Error::Unit(format!("'{}' is not a record", r.id)));
        };
        b = b.kind(r.kind).scope(r.scope.clone()).span(r.span);
        if let Some(args) = template {
            b = b.template(args);
        }
        for (ty, offset, span) in bases {
            b = b.base_at(ty, offset, span);
        }
        for (name, ty, offset, span) in fields {
            b = b.field_at(name, ty, offset, span);
        }
        for m in methods {
            b = b.push_method(m);
        }
        if let Some(layout) = &r.layout {
            b = b.layout(layout.size, layout.align);
        }
        if !r.trivially_copyable {
            b = b.non_trivially_copyable();
        }
        if !r.trivially_destructible {
            b = b.non_trivially_destructible();
        }
        if !r.standard_layout {
            b = b.non_standard_layout();
        }
        if !r.complete {
            b = b.incomplete();
        }
        if let Some(lambda) = &r.lambda {
            b = b.lambda(lambda.captures_this);
        }
        b.finish();
        Ok(())
    }

    fn load_functions(
        &mut self,
        raw: &[RawFunction],
    ) -> Result<(FunctionTable, BTreeMap<String, FnId>)> {
        let mut table = FunctionTable::new();
        let mut ids = BTreeMap::new();
        for f in raw {
            let mut decl = FunctionDecl::new(&f.name);
            decl.scope = f.scope.clone();
            decl.span = f.span;
            decl.defined = f.defined;
            decl.external = f.external;
            decl.builtin = f.builtin;
            decl.simd = f.simd;
            if ids.insert(f.id.clone(), table.add(decl)).is_some() {
                return Err(Error::Unit(format!("duplicate function id '{}'", f.id)));
            }
        }

        for f in raw {
            let id = lookup_fn(&ids, &f.id)?;
            let mut redecls = Vec::with_capacity(f.redecls.len() + 1);
            if !f.attrs.is_empty() {
                redecls.push(Redecl {
                    span: f.span,
                    attrs: attributes(&f.id, &f.attrs)?,
                });
            }
            for r in &f.redecls {
                redecls.push(Redecl {
                    span: r.span,
                    attrs: attributes(&f.id, &r.attrs)?,
                });
            }
            let mut calls = Vec::with_capacity(f.calls.len());
            for c in &f.calls {
                let callee = match &c.callee {
                    RawCallee::Direct(name) => Callee::Direct(lookup_fn(&ids, name)?),
                    RawCallee::Virtual(name) => Callee::Virtual(lookup_fn(&ids, name)?),
                    RawCallee::Indirect => Callee::Indirect,
                };
                calls.push(CallSite {
                    callee,
                    span: c.span,
                    constexpr: c.constexpr,
                });
            }
            let rtti = f
                .rtti
                .iter()
                .map(|r| RttiUse {
                    kind: match r.kind {
                        RawRttiKind::Typeid => RttiKind::TypeId,
                        RawRttiKind::DynamicCast => RttiKind::DynamicCast,
                    },
                    span: r.span,
                    constexpr: r.constexpr,
                })
                .collect();

            let decl = table.get_mut(id);
            decl.redecls = redecls;
            decl.calls = calls;
            decl.rtti = rtti;
        }
        Ok((table, ids))
    }
}

fn lookup_fn(ids: &BTreeMap<String, FnId>, id: &str) -> Result<FnId> {
    ids.get(id)
        .copied()
        .ok_or_else(|| Error::Unit(format!("unknown function '{}'", id)))
}

fn attributes(owner: &str, raw: &[RawAttr]) -> Result<Vec<Spanned<KernelAttr>>> {
    raw.iter()
        .map(|a| {
            KernelAttr::from_parts(&a.name, &a.args)
                .map(|attr| Spanned::new(attr, a.span))
                .map_err(|e| Error::Unit(format!("function '{}': {}", owner, e)))
        })
        .collect()
}

/// Records ordered so that everything a record embeds by value (bases,
/// fields, array elements) is defined before it.
fn definition_order<'r>(
    records: &'r [RawRecord],
    by_id: &BTreeMap<&'r str, &'r RawRecord>,
) -> Result<Vec<&'r str>> {
    fn visit<'r>(
        id: &'r str,
        by_id: &BTreeMap<&'r str, &'r RawRecord>,
        done: &mut BTreeSet<&'r str>,
        active: &mut Vec<&'r str>,
        order: &mut Vec<&'r str>,
    ) -> Result<()> {
        if done.contains(id) {
            return Ok(());
        }
        if active.contains(&id) {
            return Err(Error::Unit(format!(
                "record '{}' contains itself by value",
                id
            )));
        }
        let Some(&r) = by_id.get(id) else {
            return Err(Error::Unit(format!("unknown record '{}'", id)));
        };
        active.push(id);
        let deps = r
            .bases
            .iter()
            .map(|b| &b.ty)
            .chain(r.fields.iter().map(|f| &f.ty))
            .filter_map(TypeRef::embedded_record);
        for dep in deps {
            visit(dep, by_id, done, active, order)?;
        }
        active.pop();
        done.insert(id);
        order.push(id);
        Ok(())
    }

    let mut done = BTreeSet::new();
    let mut active = Vec::new();
    let mut order = Vec::with_capacity(records.len());
    for r in records {
        visit(&r.id, by_id, &mut done, &mut active, &mut order)?;
    }
    Ok(order)
}
