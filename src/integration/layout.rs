use crate::names::NameOracle;
use crate::types::classify::{Classifier, ResourceKind};
use crate::types::{TemplateArg, TyId, TypeTable};
use crate::visit::{Capabilities, FieldHandler, Member};

use super::{LayoutEntry, ParamKind, SpecConstant};
use crate::kernel::INIT;

/// Offset bookkeeping for one struct, stream or array scope.
struct Scope {
    /// Accumulator value to restore on leave.
    saved: u64,
    /// Start of element 0, for array scopes.
    array_base: Option<u64>,
}

/// Records one layout entry per visited leaf, in parameter order.
pub struct LayoutEmitter<'a> {
    types: &'a TypeTable,
    classifier: &'a Classifier,
    names: &'a dyn NameOracle,
    entries: Vec<LayoutEntry>,
    spec_constants: Vec<SpecConstant>,
    offset: u64,
    scopes: Vec<Scope>,
    depth: usize,
}

impl<'a> LayoutEmitter<'a> {
    pub fn new(types: &'a TypeTable, classifier: &'a Classifier, names: &'a dyn NameOracle) -> Self {
        Self {
            types,
            classifier,
            names,
            entries: Vec::new(),
            spec_constants: Vec::new(),
            offset: 0,
            scopes: Vec::new(),
            depth: 0,
        }
    }

    pub fn finish(self) -> (Vec<LayoutEntry>, Vec<SpecConstant>) {
        debug_assert!(self.scopes.is_empty(), "unbalanced traversal scopes");
        (self.entries, self.spec_constants)
    }

    /// Kernel objects over [`crate::check::MAX_KERNEL_OBJECT_SIZE`] are
    /// rejected before layout, so both conversions fit.
    fn add(&mut self, kind: ParamKind, info: u64, m: &Member<'_>) {
        let offset = self.offset + m.owner_offset();
        self.entries.push(LayoutEntry {
            kind,
            info: i32::try_from(info).unwrap_or(i32::MAX),
            offset: u32::try_from(offset).unwrap_or(u32::MAX),
        });
    }

    fn add_sized(&mut self, kind: ParamKind, m: &Member<'_>) {
        let size = self.types.size_of(m.ty);
        self.add(kind, size, m);
    }

    fn enter(&mut self, m: &Member<'_>, array: bool) {
        let start = self.offset + m.owner_offset();
        self.scopes.push(Scope {
            saved: self.offset,
            array_base: array.then_some(start),
        });
        self.offset = start;
    }

    fn leave(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            self.offset = scope.saved;
        }
    }

    fn register_spec_constant(&mut self, ty: TyId) {
        let id_type = self
            .types
            .as_record(ty)
            .and_then(|d| d.template_args.as_ref())
            .and_then(|args| match args.get(1) {
                Some(TemplateArg::Type(id)) => Some(*id),
                _ => None,
            });
        if let Some(id_type) = id_type {
            self.spec_constants.push(SpecConstant {
                stable_name: self.names.stable_name(self.types, id_type),
                id_type,
            });
        }
    }
}

/// Accessor info word: access target in the low bits, dimensions from
/// bit 11.
pub fn accessor_info(dims: i64, target: i64) -> u64 {
    (target | (dims << 11)) as u64
}

impl FieldHandler for LayoutEmitter<'_> {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            visit_inside_simple_containers: false,
            ..Capabilities::default()
        }
    }

    fn handle_resource(&mut self, m: &Member<'_>, kind: ResourceKind) {
        match kind {
            ResourceKind::Accessor => {
                let (dims, target) = self
                    .classifier
                    .accessor_shape(self.types, m.ty)
                    .unwrap_or((0, 0));
                self.add(ParamKind::Accessor, accessor_info(dims, target), m);
            }
            ResourceKind::Sampler => {
                let size = self
                    .types
                    .as_record(m.ty)
                    .and_then(|d| d.method(INIT))
                    .and_then(|init| init.params.first())
                    .map(|&p| self.types.size_of(p))
                    .unwrap_or(0);
                self.add(ParamKind::Sampler, size, m);
            }
            ResourceKind::Stream | ResourceKind::Half => self.add_sized(ParamKind::StdLayout, m),
            ResourceKind::SpecConstant => self.register_spec_constant(m.ty),
        }
    }

    fn handle_pointer(&mut self, m: &Member<'_>) {
        let kind = if self.depth > 0 {
            ParamKind::StdLayout
        } else {
            ParamKind::Pointer
        };
        self.add_sized(kind, m);
    }

    fn handle_scalar(&mut self, m: &Member<'_>) {
        self.add_sized(ParamKind::StdLayout, m);
    }

    fn handle_non_decomp_struct(&mut self, m: &Member<'_>) {
        self.add_sized(ParamKind::StdLayout, m);
    }

    fn handle_union_type(&mut self, m: &Member<'_>) -> bool {
        self.add_sized(ParamKind::StdLayout, m);
        true
    }

    fn handle_simple_array(&mut self, m: &Member<'_>) {
        self.add_sized(ParamKind::StdLayout, m);
    }

    fn enter_struct(&mut self, m: &Member<'_>) {
        self.depth += 1;
        self.enter(m, false);
    }

    fn leave_struct(&mut self, _: &Member<'_>) {
        self.depth -= 1;
        self.leave();
    }

    fn enter_stream(&mut self, m: &Member<'_>) {
        self.depth += 1;
        self.enter(m, false);
    }

    fn leave_stream(&mut self, _: &Member<'_>) {
        self.depth -= 1;
        self.leave();
    }

    fn enter_array(&mut self, m: &Member<'_>, _: TyId) {
        self.enter(m, true);
    }

    fn next_element(&mut self, elem: TyId, index: u64) {
        if let Some(base) = self.scopes.last().and_then(|s| s.array_base) {
            self.offset = base + self.types.size_of(elem) * index;
        }
    }

    fn leave_array(&mut self, _: &Member<'_>, _: TyId) {
        self.leave();
    }
}
