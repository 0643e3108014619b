use std::cell::RefCell;

use crate::types::classify::{Classifier, ResourceKind};
use crate::types::{AddrSpace, Ty, TypeTable};
use crate::visit::{Capabilities, FieldHandler, Member};

use super::{init_method_name, KernelParam, ParamList, ParamTy};

/// Allocates the synthetic parameters, one run per visited leaf.
pub struct ParamBuilder<'a> {
    types: &'a TypeTable,
    classifier: &'a Classifier,
    params: &'a RefCell<ParamList>,
    simd: bool,
    /// Struct, base and stream scopes; arrays do not count.
    depth: usize,
}

impl<'a> ParamBuilder<'a> {
    pub fn new(
        types: &'a TypeTable,
        classifier: &'a Classifier,
        params: &'a RefCell<ParamList>,
        simd: bool,
    ) -> Self {
        Self {
            types,
            classifier,
            params,
            simd,
            depth: 0,
        }
    }

    fn push_single(&mut self, m: &Member<'_>, ty: ParamTy) {
        let mut params = self.params.borrow_mut();
        params.begin_field();
        params.push(KernelParam::new(param_name(m), ty));
    }

    /// One parameter per argument of the resource's init routine.
    fn push_init_params(&mut self, m: &Member<'_>, kind: ResourceKind) {
        let mut params = self.params.borrow_mut();
        params.begin_field();
        let Some(init) = self
            .types
            .as_record(m.ty)
            .and_then(|d| d.method(init_method_name(kind, self.simd)))
        else {
            return;
        };
        let location = if kind == ResourceKind::Accessor {
            self.classifier
                .buffer_locations(self.types, m.ty)
                .first()
                .and_then(|&n| u32::try_from(n).ok())
        } else {
            None
        };
        let name = param_name(m);
        for &p in &init.params {
            let is_pointer = matches!(self.types.get(p), Ty::Pointer { .. });
            params.push(KernelParam {
                name: name.clone(),
                ty: ParamTy::Value(p),
                buffer_location: location.filter(|_| is_pointer),
                simd_accessor_ptr: is_pointer && self.simd && kind == ResourceKind::Accessor,
            });
        }
    }
}

/// `_arg_<field>`; bases are all `_arg__base`.
pub fn param_name(m: &Member<'_>) -> String {
    if m.is_base() {
        "_arg__base".to_string()
    } else {
        format!("_arg_{}", m.name.unwrap_or_default())
    }
}

/// Device code only accepts global pointers; the two global subspaces
/// are kept as they are.
pub fn normalize_space(space: AddrSpace) -> AddrSpace {
    match space {
        AddrSpace::GlobalDevice | AddrSpace::GlobalHost => space,
        _ => AddrSpace::Global,
    }
}

impl FieldHandler for ParamBuilder<'_> {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            visit_inside_simple_containers: false,
            ..Capabilities::default()
        }
    }

    fn handle_resource(&mut self, m: &Member<'_>, kind: ResourceKind) {
        match kind {
            ResourceKind::Accessor | ResourceKind::Sampler => self.push_init_params(m, kind),
            ResourceKind::Stream | ResourceKind::Half => {
                self.push_single(m, ParamTy::Value(m.ty))
            }
            ResourceKind::SpecConstant => self.params.borrow_mut().begin_field(),
        }
    }

    fn handle_pointer(&mut self, m: &Member<'_>) {
        let Ty::Pointer { pointee, space } = self.types.get(m.ty) else {
            return;
        };
        let ptr = ParamTy::Pointer {
            pointee: *pointee,
            space: normalize_space(*space),
        };
        let ty = if self.depth > 0 {
            ParamTy::Carrier(Box::new(ptr))
        } else {
            ptr
        };
        self.push_single(m, ty);
    }

    fn handle_scalar(&mut self, m: &Member<'_>) {
        self.push_single(m, ParamTy::Value(m.ty));
    }

    fn handle_non_decomp_struct(&mut self, m: &Member<'_>) {
        self.push_single(m, ParamTy::Value(m.ty));
    }

    fn handle_union_type(&mut self, m: &Member<'_>) -> bool {
        self.push_single(m, ParamTy::Value(m.ty));
        true
    }

    fn handle_simple_array(&mut self, m: &Member<'_>) {
        self.push_single(m, ParamTy::Carrier(Box::new(ParamTy::Value(m.ty))));
    }

    fn enter_struct(&mut self, _: &Member<'_>) {
        self.depth += 1;
    }

    fn leave_struct(&mut self, _: &Member<'_>) {
        self.depth -= 1;
    }

    fn enter_stream(&mut self, _: &Member<'_>) {
        self.depth += 1;
    }

    fn leave_stream(&mut self, _: &Member<'_>) {
        self.depth -= 1;
    }
}
