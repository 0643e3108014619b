use std::cell::RefCell;

use crate::types::classify::ResourceKind;
use crate::types::{Ty, TyId, TypeTable};
use crate::visit::{Capabilities, FieldHandler, Member};

use super::params::normalize_space;
use super::{init_method_name, Expr, Init, KernelBody, ParamList, Stmt, FINALIZE};

/// One open aggregate, array or stream being rebuilt. The initializer
/// list, the access path to it and the current element index move
/// together.
struct Frame {
    ty: TyId,
    inits: Vec<Init>,
    path: Expr,
    index: u64,
}

/// Builds the initializer tree and the init/finalize calls, in lock-step
/// with [`ParamBuilder`](super::ParamBuilder), which must run first in the
/// same traversal.
pub struct BodyBuilder<'a> {
    types: &'a TypeTable,
    params: &'a RefCell<ParamList>,
    simd: bool,
    frames: Vec<Frame>,
    calls: Vec<Stmt>,
    finalizers: Vec<Stmt>,
    depth: usize,
}

impl<'a> BodyBuilder<'a> {
    pub fn new(
        types: &'a TypeTable,
        params: &'a RefCell<ParamList>,
        kernel_object: TyId,
        simd: bool,
    ) -> Self {
        Self {
            types,
            params,
            simd,
            frames: vec![Frame {
                ty: kernel_object,
                inits: Vec::new(),
                path: Expr::Clone,
                index: 0,
            }],
            calls: Vec::new(),
            finalizers: Vec::new(),
            depth: 0,
        }
    }

    /// Clone declaration, init calls in discovery order, the kernel body
    /// invocation, then deferred finalizers.
    pub fn finish(mut self) -> KernelBody {
        debug_assert_eq!(self.frames.len(), 1, "unbalanced traversal scopes");
        let root = self.frames.swap_remove(0);
        let mut stmts = Vec::with_capacity(self.calls.len() + self.finalizers.len() + 2);
        stmts.push(Stmt::DeclareClone {
            ty: root.ty,
            init: Init::List {
                ty: root.ty,
                elems: root.inits,
            },
        });
        stmts.extend(self.calls);
        stmts.push(Stmt::InvokeBody);
        stmts.extend(self.finalizers);
        KernelBody { stmts }
    }

    fn top(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    /// Access path of `m` inside the innermost open scope.
    fn member_expr(&self, m: &Member<'_>) -> Expr {
        let Some(top) = self.frames.last() else {
            return Expr::Clone;
        };
        let base = Box::new(top.path.clone());
        if m.is_base() {
            Expr::Base { base, ty: m.ty }
        } else if m.is_element() {
            Expr::Index {
                base,
                index: top.index,
            }
        } else {
            Expr::Member {
                base,
                name: m.name.unwrap_or_default().to_string(),
            }
        }
    }

    fn first_param(&self) -> usize {
        self.params.borrow().window().start
    }

    fn push_init(&mut self, init: Init) {
        self.top().inits.push(init);
    }

    fn copy_from_param(&mut self, m: &Member<'_>) {
        let from = Expr::Param(self.first_param());
        self.push_init(Init::Copy { ty: m.ty, from });
    }

    /// Call `method` on `receiver` with the leading parameters of the
    /// current window.
    fn special_call(&self, record: TyId, receiver: Expr, method: &str) -> Option<Stmt> {
        let arity = self.types.as_record(record)?.method(method)?.params.len();
        let window = self.params.borrow().window();
        Some(Stmt::Call {
            receiver,
            method: method.to_string(),
            args: window.take(arity).collect(),
        })
    }

    fn open(&mut self, m: &Member<'_>) {
        let path = self.member_expr(m);
        self.frames.push(Frame {
            ty: m.ty,
            inits: Vec::new(),
            path,
            index: 0,
        });
    }

    fn close(&mut self) -> Option<Frame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    fn close_into_parent(&mut self) {
        if let Some(frame) = self.close() {
            self.push_init(Init::List {
                ty: frame.ty,
                elems: frame.inits,
            });
        }
    }
}

impl FieldHandler for BodyBuilder<'_> {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            visit_inside_simple_containers: false,
            ..Capabilities::default()
        }
    }

    fn handle_resource(&mut self, m: &Member<'_>, kind: ResourceKind) {
        match kind {
            ResourceKind::Accessor | ResourceKind::Sampler => {
                self.push_init(Init::Default(m.ty));
                let receiver = self.member_expr(m);
                let method = init_method_name(kind, self.simd);
                if let Some(call) = self.special_call(m.ty, receiver, method) {
                    self.calls.push(call);
                }
            }
            ResourceKind::Stream | ResourceKind::Half => self.copy_from_param(m),
            ResourceKind::SpecConstant => self.push_init(Init::Default(m.ty)),
        }
    }

    fn handle_pointer(&mut self, m: &Member<'_>) {
        let index = self.first_param();
        let mut from = if self.depth > 0 {
            Expr::unwrap_carrier(index)
        } else {
            Expr::Param(index)
        };
        if let Ty::Pointer { space, .. } = self.types.get(m.ty) {
            if normalize_space(*space) != *space {
                from = Expr::AddrSpaceCast {
                    expr: Box::new(from),
                    to: m.ty,
                };
            }
        }
        self.push_init(Init::Copy { ty: m.ty, from });
    }

    fn handle_scalar(&mut self, m: &Member<'_>) {
        self.copy_from_param(m);
    }

    fn handle_non_decomp_struct(&mut self, m: &Member<'_>) {
        self.copy_from_param(m);
    }

    fn handle_union_type(&mut self, m: &Member<'_>) -> bool {
        self.copy_from_param(m);
        true
    }

    fn handle_simple_array(&mut self, m: &Member<'_>) {
        let from = Expr::unwrap_carrier(self.first_param());
        self.push_init(Init::Copy { ty: m.ty, from });
    }

    fn enter_struct(&mut self, m: &Member<'_>) {
        self.depth += 1;
        self.open(m);
    }

    fn leave_struct(&mut self, _: &Member<'_>) {
        self.depth -= 1;
        self.close_into_parent();
    }

    /// The stream itself is copied from its parameter; its accessors are
    /// rebuilt in place, so their placeholders go to a detached list.
    fn enter_stream(&mut self, m: &Member<'_>) {
        self.depth += 1;
        self.open(m);
    }

    fn leave_stream(&mut self, m: &Member<'_>) {
        self.depth -= 1;
        let Some(frame) = self.close() else {
            return;
        };
        let init = init_method_name(ResourceKind::Stream, self.simd);
        if let Some(call) = self.special_call(m.ty, frame.path.clone(), init) {
            self.calls.push(call);
        }
        if let Some(call) = self.special_call(m.ty, frame.path, FINALIZE) {
            self.finalizers.push(call);
        }
    }

    fn enter_array(&mut self, m: &Member<'_>, _: TyId) {
        self.open(m);
    }

    fn next_element(&mut self, _: TyId, index: u64) {
        self.top().index = index;
    }

    fn leave_array(&mut self, _: &Member<'_>, _: TyId) {
        self.close_into_parent();
    }
}
