//! Type and aggregate model consumed by the kernel lowering.
//!
//! Types are interned in a [`TypeTable`] and referred to by [`TyId`].
//! Aggregates are immutable once defined; the only state that changes
//! afterwards is the per-type "requires decomposition" flag, which is
//! written at most once.

pub mod builder;
pub mod classify;

use std::cell::OnceCell;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::span::Span;

pub use builder::RecordBuilder;

/// Interned type handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TyId(u32);

/// Aggregate declaration handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(u32);

impl TyId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl RecordId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Builtin arithmetic types.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Scalar {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    I128,
    U128,
    F16,
    F32,
    F64,
    LongDouble,
    F128,
}

impl Scalar {
    pub fn size(self) -> u64 {
        match self {
            Scalar::Bool | Scalar::I8 | Scalar::U8 => 1,
            Scalar::I16 | Scalar::U16 | Scalar::F16 => 2,
            Scalar::I32 | Scalar::U32 | Scalar::F32 => 4,
            Scalar::I64 | Scalar::U64 | Scalar::F64 => 8,
            Scalar::I128 | Scalar::U128 | Scalar::LongDouble | Scalar::F128 => 16,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Scalar::Bool => "bool",
            Scalar::I8 => "signed char",
            Scalar::U8 => "unsigned char",
            Scalar::I16 => "short",
            Scalar::U16 => "unsigned short",
            Scalar::I32 => "int",
            Scalar::U32 => "unsigned int",
            Scalar::I64 => "long",
            Scalar::U64 => "unsigned long",
            Scalar::I128 => "__int128",
            Scalar::U128 => "unsigned __int128",
            Scalar::F16 => "_Float16",
            Scalar::F32 => "float",
            Scalar::F64 => "double",
            Scalar::LongDouble => "long double",
            Scalar::F128 => "__float128",
        }
    }
}

/// Address spaces a pointer may point into.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AddrSpace {
    #[default]
    Generic,
    Global,
    GlobalDevice,
    GlobalHost,
    Local,
    Constant,
    Private,
}

impl AddrSpace {
    pub fn qualifier(self) -> &'static str {
        match self {
            AddrSpace::Generic => "",
            AddrSpace::Global => "__global",
            AddrSpace::GlobalDevice => "__global_device",
            AddrSpace::GlobalHost => "__global_host",
            AddrSpace::Local => "__local",
            AddrSpace::Constant => "__constant",
            AddrSpace::Private => "__private",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArrayLen {
    Fixed(u64),
    /// Runtime-sized (VLA).
    Variable,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Ty {
    Void,
    Scalar(Scalar),
    Vector { elem: Scalar, lanes: u32 },
    Pointer { pointee: TyId, space: AddrSpace },
    Reference { pointee: TyId },
    Array { elem: TyId, len: ArrayLen },
    Record(RecordId),
    /// Anything the lowering has no model for (function types, enums
    /// without a fixed underlying type, ...). Never a valid field type.
    Opaque { name: String },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    #[default]
    Struct,
    Class,
    Union,
}

/// One link of a declaration's enclosing-scope chain, outermost first.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclContext {
    Namespace(String),
    /// Non-template class.
    Record(String),
    /// Class template specialization.
    Specialization(String),
    Function(String),
}

impl DeclContext {
    pub fn name(&self) -> &str {
        match self {
            DeclContext::Namespace(n)
            | DeclContext::Record(n)
            | DeclContext::Specialization(n)
            | DeclContext::Function(n) => n,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TemplateArg {
    Type(TyId),
    Integral(i64),
    Pack(Vec<TemplateArg>),
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: Option<String>,
    pub ty: TyId,
    /// Byte offset within the owning record.
    pub offset: u64,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct BaseSpec {
    pub ty: TyId,
    pub offset: u64,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct Method {
    pub name: String,
    pub params: Vec<TyId>,
    pub is_call_operator: bool,
    /// Carries the SIMD kernel marker.
    pub simd: bool,
}

#[derive(Clone, Debug, Default)]
pub struct LambdaInfo {
    /// Location of an implicit `this` capture, if any.
    pub captures_this: Option<Span>,
}

#[derive(Clone, Debug)]
pub struct RecordDecl {
    /// Empty for unnamed records.
    pub name: String,
    pub kind: RecordKind,
    pub scope: Vec<DeclContext>,
    pub template_args: Option<Vec<TemplateArg>>,
    pub bases: Vec<BaseSpec>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub size: u64,
    pub align: u64,
    pub trivially_copyable: bool,
    pub trivially_destructible: bool,
    pub standard_layout: bool,
    pub complete: bool,
    pub lambda: Option<LambdaInfo>,
    pub span: Span,
}

impl RecordDecl {
    pub fn is_union(&self) -> bool {
        self.kind == RecordKind::Union
    }

    pub fn is_specialization(&self) -> bool {
        self.template_args.is_some()
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn call_operator(&self) -> Option<&Method> {
        self.methods.iter().find(|m| m.is_call_operator)
    }

    /// Declaring function, for records local to a function body.
    pub fn enclosing_function(&self) -> Option<&str> {
        self.scope.iter().rev().find_map(|c| match c {
            DeclContext::Function(f) => Some(f.as_str()),
            _ => None,
        })
    }
}

/// Owner of all types and aggregate declarations of one compilation unit.
#[derive(Debug)]
pub struct TypeTable {
    types: Vec<Ty>,
    interned: BTreeMap<Ty, TyId>,
    records: Vec<RecordDecl>,
    decompose: Vec<OnceCell<bool>>,
    pointer_size: u64,
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeTable {
    pub fn new() -> Self {
        Self::with_pointer_size(8)
    }

    pub fn with_pointer_size(pointer_size: u64) -> Self {
        Self {
            types: Vec::new(),
            interned: BTreeMap::new(),
            records: Vec::new(),
            decompose: Vec::new(),
            pointer_size,
        }
    }

    pub fn pointer_size(&self) -> u64 {
        self.pointer_size
    }

    pub fn intern(&mut self, ty: Ty) -> TyId {
        if let Some(&id) = self.interned.get(&ty) {
            return id;
        }
        let id = TyId(self.types.len() as u32);
        self.types.push(ty.clone());
        self.decompose.push(OnceCell::new());
        self.interned.insert(ty, id);
        id
    }

    pub fn scalar(&mut self, s: Scalar) -> TyId {
        self.intern(Ty::Scalar(s))
    }

    pub fn void(&mut self) -> TyId {
        self.intern(Ty::Void)
    }

    pub fn vector(&mut self, elem: Scalar, lanes: u32) -> TyId {
        self.intern(Ty::Vector { elem, lanes })
    }

    pub fn pointer(&mut self, pointee: TyId, space: AddrSpace) -> TyId {
        self.intern(Ty::Pointer { pointee, space })
    }

    pub fn reference(&mut self, pointee: TyId) -> TyId {
        self.intern(Ty::Reference { pointee })
    }

    pub fn array(&mut self, elem: TyId, len: u64) -> TyId {
        self.intern(Ty::Array {
            elem,
            len: ArrayLen::Fixed(len),
        })
    }

    pub fn vla(&mut self, elem: TyId) -> TyId {
        self.intern(Ty::Array {
            elem,
            len: ArrayLen::Variable,
        })
    }

    pub fn opaque(&mut self, name: &str) -> TyId {
        self.intern(Ty::Opaque {
            name: name.to_string(),
        })
    }

    /// Start defining a new aggregate.
    pub fn record(&mut self, name: &str) -> RecordBuilder<'_> {
        RecordBuilder::new(self, name, None)
    }

    pub fn union(&mut self, name: &str) -> RecordBuilder<'_> {
        RecordBuilder::new(self, name, None).kind(RecordKind::Union)
    }

    /// Reserve a record so that it can be referenced before its body is
    /// known. Complete it with [`TypeTable::define`].
    pub fn declare(&mut self, name: &str) -> TyId {
        let id = RecordId(self.records.len() as u32);
        self.records.push(RecordDecl {
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
            complete: false,
            lambda: None,
            span: Span::dummy(),
        });
        self.intern(Ty::Record(id))
    }

    /// Define the body of a previously declared record.
    pub fn define(&mut self, ty: TyId) -> Option<RecordBuilder<'_>> {
        let id = self.record_id(ty)?;
        let name = self.records[id.index()].name.clone();
        Some(RecordBuilder::new(self, &name, Some(id)))
    }

    pub(crate) fn install_record(&mut self, id: Option<RecordId>, decl: RecordDecl) -> TyId {
        match id {
            Some(id) => {
                self.records[id.index()] = decl;
                self.intern(Ty::Record(id))
            }
            None => {
                let id = RecordId(self.records.len() as u32);
                self.records.push(decl);
                self.intern(Ty::Record(id))
            }
        }
    }

    pub fn get(&self, ty: TyId) -> &Ty {
        &self.types[ty.index()]
    }

    pub fn record_id(&self, ty: TyId) -> Option<RecordId> {
        match self.get(ty) {
            Ty::Record(id) => Some(*id),
            _ => None,
        }
    }

    pub fn record_decl(&self, id: RecordId) -> &RecordDecl {
        &self.records[id.index()]
    }

    /// Aggregate declaration behind `ty`, if it is a record type.
    pub fn as_record(&self, ty: TyId) -> Option<&RecordDecl> {
        self.record_id(ty).map(|id| self.record_decl(id))
    }

    pub fn records(&self) -> impl Iterator<Item = (TyId, &RecordDecl)> {
        self.records.iter().enumerate().filter_map(|(i, decl)| {
            let ty = self.interned.get(&Ty::Record(RecordId(i as u32)))?;
            Some((*ty, decl))
        })
    }

    pub fn size_of(&self, ty: TyId) -> u64 {
        match self.get(ty) {
            Ty::Void | Ty::Opaque { .. } => 0,
            Ty::Scalar(s) => s.size(),
            Ty::Vector { elem, lanes } => elem.size() * u64::from(lanes.next_power_of_two()),
            Ty::Pointer { .. } | Ty::Reference { .. } => self.pointer_size,
            Ty::Array { elem, len } => match len {
                ArrayLen::Fixed(n) => self.size_of(*elem).saturating_mul(*n),
                ArrayLen::Variable => 0,
            },
            Ty::Record(id) => self.record_decl(*id).size,
        }
    }

    pub fn align_of(&self, ty: TyId) -> u64 {
        match self.get(ty) {
            Ty::Void | Ty::Opaque { .. } => 1,
            Ty::Scalar(s) => s.size(),
            Ty::Vector { .. } => self.size_of(ty).max(1),
            Ty::Pointer { .. } | Ty::Reference { .. } => self.pointer_size,
            Ty::Array { elem, .. } => self.align_of(*elem),
            Ty::Record(id) => self.record_decl(*id).align.max(1),
        }
    }

    /// Persisted decomposition flag; `None` until computed.
    pub fn decomposition_flag(&self, ty: TyId) -> Option<bool> {
        self.decompose[ty.index()].get().copied()
    }

    /// Whether a field of type `ty` is flattened into its members.
    /// Types that were never analysed are passed whole.
    pub fn requires_decomposition(&self, ty: TyId) -> bool {
        self.decomposition_flag(ty).unwrap_or(false)
    }

    /// Record the decomposition flag for `ty`. Once set, later writes are
    /// ignored.
    pub fn persist_decomposition(&self, ty: TyId, value: bool) {
        if let Err(value) = self.decompose[ty.index()].set(value) {
            debug_assert_eq!(self.decomposition_flag(ty), Some(value));
        }
    }

    /// `ns::Outer::Name` without template arguments.
    pub fn qualified_name(&self, id: RecordId) -> String {
        let decl = self.record_decl(id);
        let mut parts: Vec<&str> = decl
            .scope
            .iter()
            .filter(|c| !matches!(c, DeclContext::Function(_)))
            .map(DeclContext::name)
            .collect();
        let name = if decl.name.is_empty() {
            if decl.lambda.is_some() {
                "(lambda)"
            } else {
                "(anonymous)"
            }
        } else {
            decl.name.as_str()
        };
        parts.push(name);
        parts.join("::")
    }

    /// C++-flavoured spelling of a type, used in diagnostics and in the
    /// integration header.
    pub fn display(&self, ty: TyId) -> String {
        match self.get(ty) {
            Ty::Void => "void".to_string(),
            Ty::Scalar(s) => s.name().to_string(),
            Ty::Vector { elem, lanes } => {
                format!("{} __attribute__((ext_vector_type({})))", elem.name(), lanes)
            }
            Ty::Pointer { pointee, space } => {
                let q = space.qualifier();
                if q.is_empty() {
                    format!("{} *", self.display(*pointee))
                } else {
                    format!("{} {} *", q, self.display(*pointee))
                }
            }
            Ty::Reference { pointee } => format!("{} &", self.display(*pointee)),
            Ty::Array { elem, len } => match len {
                ArrayLen::Fixed(n) => format!("{} [{}]", self.display(*elem), n),
                ArrayLen::Variable => format!("{} []", self.display(*elem)),
            },
            Ty::Record(id) => {
                let mut out = self.qualified_name(*id);
                if let Some(args) = &self.record_decl(*id).template_args {
                    let rendered: Vec<String> =
                        args.iter().map(|a| self.display_arg(a)).collect();
                    out.push('<');
                    out.push_str(&rendered.join(", "));
                    out.push('>');
                }
                out
            }
            Ty::Opaque { name } => name.clone(),
        }
    }

    fn display_arg(&self, arg: &TemplateArg) -> String {
        match arg {
            TemplateArg::Type(ty) => self.display(*ty),
            TemplateArg::Integral(v) => v.to_string(),
            TemplateArg::Pack(items) => items
                .iter()
                .map(|a| self.display_arg(a))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align).saturating_mul(align)
    }
}
