//! Type classification for kernel-object fields.
//!
//! Resource types are recognised structurally: a declaration matches when
//! its enclosing-scope chain and terminal name equal a registered pattern.
//! No inheritance relation between resource types is assumed.

use crate::config::TargetConfig;

use super::{ArrayLen, DeclContext, RecordDecl, Scalar, TemplateArg, Ty, TyId, TypeTable};

/// Opaque device resources with custom flattening rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Accessor,
    Sampler,
    Stream,
    Half,
    SpecConstant,
}

impl ResourceKind {
    /// Resources that are reconstructed through a designated init routine.
    pub fn has_init_routine(self) -> bool {
        matches!(
            self,
            ResourceKind::Accessor | ResourceKind::Sampler | ResourceKind::Stream
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::Accessor => "accessor",
            ResourceKind::Sampler => "sampler",
            ResourceKind::Stream => "stream",
            ResourceKind::Half => "half",
            ResourceKind::SpecConstant => "specialization constant",
        }
    }
}

/// Why a field type is rejected outright.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unsupported {
    VariableLengthArray,
    ZeroLengthArray,
    ExtendedPrecision,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Resource(ResourceKind),
    Record,
    Union,
    Reference,
    Pointer,
    Array,
    /// Scalars and vectors.
    Scalar,
    Other(Unsupported),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Namespace,
    Record,
    Specialization,
    Function,
}

impl ScopeKind {
    fn of(ctx: &DeclContext) -> Self {
        match ctx {
            DeclContext::Namespace(_) => ScopeKind::Namespace,
            DeclContext::Record(_) => ScopeKind::Record,
            DeclContext::Specialization(_) => ScopeKind::Specialization,
            DeclContext::Function(_) => ScopeKind::Function,
        }
    }
}

/// Expected declaration-context chain, outermost first, ending with the
/// terminal declaration itself.
#[derive(Clone, Debug)]
pub struct ScopePattern {
    chain: Vec<(ScopeKind, String)>,
}

impl ScopePattern {
    pub fn new(chain: &[(ScopeKind, &str)]) -> Self {
        Self {
            chain: chain.iter().map(|(k, n)| (*k, n.to_string())).collect(),
        }
    }

    /// `a::b::Name` where every scope is a namespace.
    pub fn namespaced(path: &[&str], terminal: ScopeKind) -> Self {
        let Some((last, scopes)) = path.split_last() else {
            return Self { chain: Vec::new() };
        };
        let mut chain: Vec<(ScopeKind, &str)> =
            scopes.iter().map(|s| (ScopeKind::Namespace, *s)).collect();
        chain.push((terminal, last));
        Self::new(&chain)
    }

    /// Match an enclosing scope chain plus terminal context. The chain must
    /// be consumed exactly: `x::cl::sycl::accessor` does not match
    /// `cl::sycl::accessor`.
    pub fn matches(&self, scope: &[DeclContext], terminal: &DeclContext) -> bool {
        if scope.len() + 1 != self.chain.len() {
            return false;
        }
        scope
            .iter()
            .chain(std::iter::once(terminal))
            .zip(&self.chain)
            .all(|(ctx, (kind, name))| ScopeKind::of(ctx) == *kind && ctx.name() == name)
    }

    pub fn matches_record(&self, decl: &RecordDecl) -> bool {
        self.matches(&decl.scope, &terminal_context(decl))
    }
}

pub fn terminal_context(decl: &RecordDecl) -> DeclContext {
    if decl.is_specialization() {
        DeclContext::Specialization(decl.name.clone())
    } else {
        DeclContext::Record(decl.name.clone())
    }
}

/// Registry of structurally recognised types plus target precision
/// support. A pure query object.
#[derive(Clone, Debug)]
pub struct Classifier {
    resources: Vec<(ScopePattern, ResourceKind)>,
    property_list: ScopePattern,
    buffer_location: ScopePattern,
    this_item: ScopePattern,
    has_float128: bool,
}

impl Classifier {
    pub fn new(target: &TargetConfig) -> Self {
        use ScopeKind::{Function, Namespace, Record, Specialization};
        Self {
            resources: vec![
                (
                    ScopePattern::namespaced(&["cl", "sycl", "accessor"], Specialization),
                    ResourceKind::Accessor,
                ),
                (
                    ScopePattern::namespaced(&["cl", "sycl", "sampler"], Record),
                    ResourceKind::Sampler,
                ),
                (
                    ScopePattern::namespaced(&["cl", "sycl", "stream"], Record),
                    ResourceKind::Stream,
                ),
                (
                    ScopePattern::namespaced(&["cl", "sycl", "detail", "half_impl", "half"], Record),
                    ResourceKind::Half,
                ),
                (
                    ScopePattern::namespaced(
                        &["cl", "sycl", "ONEAPI", "experimental", "spec_constant"],
                        Specialization,
                    ),
                    ResourceKind::SpecConstant,
                ),
            ],
            property_list: ScopePattern::namespaced(
                &["cl", "sycl", "ONEAPI", "accessor_property_list"],
                Specialization,
            ),
            buffer_location: ScopePattern::new(&[
                (Namespace, "cl"),
                (Namespace, "sycl"),
                (Namespace, "INTEL"),
                (Namespace, "property"),
                (Record, "buffer_location"),
                (Specialization, "instance"),
            ]),
            this_item: ScopePattern::namespaced(&["cl", "sycl", "this_item"], Function),
            has_float128: target.has_float128,
        }
    }

    /// Add or override a resource pattern.
    pub fn register(&mut self, pattern: ScopePattern, kind: ResourceKind) {
        self.resources.insert(0, (pattern, kind));
    }

    pub fn resource_kind(&self, types: &TypeTable, ty: TyId) -> Option<ResourceKind> {
        let decl = types.as_record(ty)?;
        let terminal = terminal_context(decl);
        self.resources
            .iter()
            .find(|(pattern, _)| pattern.matches(&decl.scope, &terminal))
            .map(|(_, kind)| *kind)
    }

    pub fn is_resource(&self, types: &TypeTable, ty: TyId, kind: ResourceKind) -> bool {
        self.resource_kind(types, ty) == Some(kind)
    }

    pub fn is_property_list(&self, types: &TypeTable, ty: TyId) -> bool {
        types
            .as_record(ty)
            .is_some_and(|d| self.property_list.matches_record(d))
    }

    pub fn is_buffer_location(&self, types: &TypeTable, ty: TyId) -> bool {
        types
            .as_record(ty)
            .is_some_and(|d| self.buffer_location.matches_record(d))
    }

    /// Whether a function declared in `scope` named `name` is the
    /// `this_item` free function.
    pub fn is_this_item(&self, scope: &[DeclContext], name: &str) -> bool {
        self.this_item
            .matches(scope, &DeclContext::Function(name.to_string()))
    }

    /// `(dimensions, access target)` of an accessor specialization.
    pub fn accessor_shape(&self, types: &TypeTable, ty: TyId) -> Option<(i64, i64)> {
        let args = types.as_record(ty)?.template_args.as_ref()?;
        match (args.get(1), args.get(3)) {
            (Some(TemplateArg::Integral(dims)), Some(TemplateArg::Integral(target))) => {
                Some((*dims, *target))
            }
            _ => None,
        }
    }

    /// Buffer locations declared through an accessor's property list.
    /// Malformed lists yield nothing; the field checker reports them.
    pub fn buffer_locations(&self, types: &TypeTable, ty: TyId) -> Vec<i64> {
        let Some(TemplateArg::Type(list)) = types
            .as_record(ty)
            .and_then(|d| d.template_args.as_ref())
            .and_then(|args| args.get(5))
        else {
            return Vec::new();
        };
        if !self.is_property_list(types, *list) {
            return Vec::new();
        }
        let Some([TemplateArg::Pack(props)]) = types
            .as_record(*list)
            .and_then(|d| d.template_args.as_deref())
        else {
            return Vec::new();
        };
        props
            .iter()
            .filter_map(|p| match p {
                TemplateArg::Type(p) if self.is_buffer_location(types, *p) => {
                    match types.as_record(*p)?.template_args.as_deref()? {
                        [TemplateArg::Integral(n)] => Some(*n),
                        _ => None,
                    }
                }
                _ => None,
            })
            .collect()
    }

    pub fn is_unsupported_scalar(&self, s: Scalar) -> bool {
        match s {
            Scalar::I128 | Scalar::U128 | Scalar::LongDouble => true,
            Scalar::F128 => !self.has_float128,
            _ => false,
        }
    }

    pub fn classify(&self, types: &TypeTable, ty: TyId) -> Category {
        match types.get(ty) {
            Ty::Reference { .. } => Category::Reference,
            Ty::Pointer { .. } => Category::Pointer,
            Ty::Array { len, .. } => match len {
                ArrayLen::Variable => Category::Other(Unsupported::VariableLengthArray),
                ArrayLen::Fixed(0) => Category::Other(Unsupported::ZeroLengthArray),
                ArrayLen::Fixed(_) => Category::Array,
            },
            Ty::Record(id) => {
                if let Some(kind) = self.resource_kind(types, ty) {
                    Category::Resource(kind)
                } else if types.record_decl(*id).is_union() {
                    Category::Union
                } else {
                    Category::Record
                }
            }
            Ty::Scalar(s) | Ty::Vector { elem: s, .. } => {
                if self.is_unsupported_scalar(*s) {
                    Category::Other(Unsupported::ExtendedPrecision)
                } else {
                    Category::Scalar
                }
            }
            Ty::Void | Ty::Opaque { .. } => Category::Other(Unsupported::Other),
        }
    }

    /// Walk pointer and array chains down to the ultimate pointee/element.
    pub fn strip_indirections(&self, types: &TypeTable, mut ty: TyId) -> TyId {
        loop {
            match types.get(ty) {
                Ty::Pointer { pointee, .. } | Ty::Reference { pointee } => ty = *pointee,
                Ty::Array { elem, .. } => ty = *elem,
                _ => return ty,
            }
        }
    }

    /// A pointer (possibly through further pointers) to a runtime-sized
    /// array.
    pub fn points_to_vla(&self, types: &TypeTable, ty: TyId) -> bool {
        let mut cur = ty;
        while let Ty::Pointer { pointee, .. } = types.get(cur) {
            cur = *pointee;
            if let Ty::Array {
                len: ArrayLen::Variable,
                ..
            } = types.get(cur)
            {
                return true;
            }
        }
        false
    }

    /// Extended precision anywhere along a pointer/array chain.
    pub fn has_unsupported_precision(&self, types: &TypeTable, ty: TyId) -> bool {
        match types.get(self.strip_indirections(types, ty)) {
            Ty::Scalar(s) | Ty::Vector { elem: s, .. } => self.is_unsupported_scalar(*s),
            _ => false,
        }
    }
}
