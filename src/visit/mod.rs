//! Generic traversal of a kernel object's aggregate type graph.
//!
//! One depth-first walk drives any number of [`FieldHandler`]s. Each
//! handler declares [`Capabilities`]; the walker routes every event only to
//! the handlers that opted into it, so a handler never needs to know which
//! branch (decomposed or opaque, first or Nth element) was taken.

use crate::span::Span;
use crate::types::classify::{Category, Classifier, ResourceKind, Unsupported};
use crate::types::{ArrayLen, Ty, TyId, TypeTable};


/// Static opt-ins of a handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Receive callbacks for union members (between enter/leave union).
    pub visit_union_body: bool,
    /// Receive every array element, not only the first.
    pub visit_nth_array_element: bool,
    /// Descend into aggregates and arrays that do not require
    /// decomposition instead of seeing them as one opaque leaf.
    pub visit_inside_simple_containers: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            visit_union_body: false,
            visit_nth_array_element: true,
            visit_inside_simple_containers: true,
        }
    }
}

/// How a member is reached from its owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Field(usize),
    Base(usize),
}

/// The field, base or array element currently being visited.
#[derive(Clone, Copy, Debug)]
pub struct Member<'t> {
    /// Record that declares the field or base.
    pub owner: TyId,
    pub origin: Origin,
    pub name: Option<&'t str>,
    /// Type the field or base is declared with.
    pub declared_ty: TyId,
    /// Type being visited; differs from `declared_ty` for array elements.
    pub ty: TyId,
    /// Byte offset of the declared field within `owner`.
    pub offset: u64,
    pub span: Span,
}

impl<'t> Member<'t> {
    pub fn is_base(&self) -> bool {
        matches!(self.origin, Origin::Base(_))
    }

    /// Visiting an element of the declared array rather than the field.
    pub fn is_element(&self) -> bool {
        self.ty != self.declared_ty
    }

    /// Offset contribution relative to the enclosing scope. Elements share
    /// their array's baseline, which is advanced by `next_element`.
    pub fn owner_offset(&self) -> u64 {
        if self.is_element() {
            0
        } else {
            self.offset
        }
    }

    fn element(&self, ty: TyId) -> Self {
        Self { ty, ..*self }
    }
}

/// Callbacks fired by [`KernelObjVisitor`]. Every hook defaults to a no-op;
/// the `handle_*_type` gates default to `true` (descend).
#[allow(unused_variables)]
pub trait FieldHandler {
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn handle_resource(&mut self, m: &Member<'_>, kind: ResourceKind) {}
    fn handle_reference(&mut self, m: &Member<'_>) {}
    fn handle_pointer(&mut self, m: &Member<'_>) {}
    fn handle_scalar(&mut self, m: &Member<'_>) {}
    fn handle_other(&mut self, m: &Member<'_>, why: Unsupported) {}
    /// Aggregate not requiring decomposition, seen as one leaf.
    fn handle_non_decomp_struct(&mut self, m: &Member<'_>) {}
    /// Array not requiring decomposition, seen as one leaf.
    fn handle_simple_array(&mut self, m: &Member<'_>) {}

    /// Gate before descending into an aggregate.
    fn handle_struct_type(&mut self, m: &Member<'_>) -> bool {
        true
    }
    /// Gate before a union; for handlers that do not visit union bodies
    /// this is also the union-as-leaf callback.
    fn handle_union_type(&mut self, m: &Member<'_>) -> bool {
        true
    }
    /// Gate before descending into an array's elements.
    fn handle_array_type(&mut self, m: &Member<'_>) -> bool {
        true
    }

    fn enter_struct(&mut self, m: &Member<'_>) {}
    fn leave_struct(&mut self, m: &Member<'_>) {}
    fn enter_union(&mut self, m: &Member<'_>) {}
    fn leave_union(&mut self, m: &Member<'_>) {}
    fn enter_stream(&mut self, m: &Member<'_>) {}
    fn leave_stream(&mut self, m: &Member<'_>) {}
    fn enter_array(&mut self, m: &Member<'_>, elem: TyId) {}
    fn leave_array(&mut self, m: &Member<'_>, elem: TyId) {}
    fn next_element(&mut self, elem: TyId, index: u64) {}
}

pub type Handler<'h> = dyn FieldHandler + 'h;

/// Depth-first walker over bases, fields and array elements.
pub struct KernelObjVisitor<'a> {
    types: &'a TypeTable,
    classifier: &'a Classifier,
}

impl<'a> KernelObjVisitor<'a> {
    pub fn new(types: &'a TypeTable, classifier: &'a Classifier) -> Self {
        Self { types, classifier }
    }

    /// Visit the bases, then the fields, of the kernel object. The object
    /// itself gets no enclosing enter/leave scope.
    pub fn visit(&self, kernel_object: TyId, handlers: &mut [&mut Handler<'_>]) {
        let mut walk = Walk {
            types: self.types,
            classifier: self.classifier,
            caps: handlers.iter().map(|h| h.capabilities()).collect(),
            handlers,
        };
        let active: Vec<usize> = (0..walk.handlers.len()).collect();
        walk.visit_record_bases(kernel_object, &active);
        walk.visit_record_fields(kernel_object, &active);
    }
}

struct Walk<'a, 'r, 'y, 'h> {
    types: &'a TypeTable,
    classifier: &'a Classifier,
    handlers: &'r mut [&'y mut Handler<'h>],
    caps: Vec<Capabilities>,
}

impl<'a, 'r, 'y, 'h> Walk<'a, 'r, 'y, 'h> {
    fn each(&mut self, active: &[usize], mut f: impl FnMut(&mut Handler<'h>)) {
        for &i in active {
            f(&mut *self.handlers[i]);
        }
    }

    /// Ask every active handler; all are called even after a refusal.
    fn all(&mut self, active: &[usize], mut f: impl FnMut(&mut Handler<'h>) -> bool) -> bool {
        let mut ok = true;
        for &i in active {
            ok &= f(&mut *self.handlers[i]);
        }
        ok
    }

    fn filter(&self, active: &[usize], keep: impl Fn(&Capabilities) -> bool) -> Vec<usize> {
        active
            .iter()
            .copied()
            .filter(|&i| keep(&self.caps[i]))
            .collect()
    }

    fn visit_record_bases(&mut self, owner: TyId, active: &[usize]) {
        let types = self.types;
        let Some(decl) = types.as_record(owner) else {
            return;
        };
        for (i, base) in decl.bases.iter().enumerate() {
            let m = Member {
                owner,
                origin: Origin::Base(i),
                name: None,
                declared_ty: base.ty,
                ty: base.ty,
                offset: base.offset,
                span: base.span,
            };
            match self.classifier.resource_kind(types, base.ty) {
                Some(kind @ (ResourceKind::Accessor | ResourceKind::Stream)) => {
                    self.each(active, |h| h.handle_resource(&m, kind));
                }
                _ => self.visit_record(&m, active),
            }
        }
    }

    fn visit_record_fields(&mut self, owner: TyId, active: &[usize]) {
        let types = self.types;
        let Some(decl) = types.as_record(owner) else {
            return;
        };
        for (i, field) in decl.fields.iter().enumerate() {
            let m = Member {
                owner,
                origin: Origin::Field(i),
                name: field.name.as_deref(),
                declared_ty: field.ty,
                ty: field.ty,
                offset: field.offset,
                span: field.span,
            };
            self.visit_field(&m, active);
        }
    }

    fn visit_field(&mut self, m: &Member<'a>, active: &[usize]) {
        match self.classifier.classify(self.types, m.ty) {
            Category::Resource(ResourceKind::Stream) => {
                self.each(active, |h| h.handle_resource(m, ResourceKind::Stream));
                self.visit_stream(m, active);
            }
            Category::Resource(kind) => self.each(active, |h| h.handle_resource(m, kind)),
            Category::Record => {
                if self.all(active, |h| h.handle_struct_type(m)) {
                    self.visit_record(m, active);
                }
            }
            Category::Union => {
                if self.all(active, |h| h.handle_union_type(m)) {
                    self.visit_union(m, active);
                }
            }
            Category::Reference => self.each(active, |h| h.handle_reference(m)),
            Category::Pointer => self.each(active, |h| h.handle_pointer(m)),
            Category::Array => self.visit_array(m, active),
            Category::Scalar => self.each(active, |h| h.handle_scalar(m)),
            Category::Other(why) => self.each(active, |h| h.handle_other(m, why)),
        }
    }

    fn visit_record(&mut self, m: &Member<'a>, active: &[usize]) {
        if self.types.requires_decomposition(m.ty) {
            self.visit_complex_record(m, active);
            return;
        }
        let simple = self.filter(active, |c| !c.visit_inside_simple_containers);
        if !simple.is_empty() {
            self.each(&simple, |h| h.handle_non_decomp_struct(m));
        }
        let complex = self.filter(active, |c| c.visit_inside_simple_containers);
        if !complex.is_empty() {
            self.visit_complex_record(m, &complex);
        }
    }

    fn visit_complex_record(&mut self, m: &Member<'a>, active: &[usize]) {
        self.each(active, |h| h.enter_struct(m));
        self.visit_record_bases(m.ty, active);
        self.visit_record_fields(m.ty, active);
        self.each(active, |h| h.leave_struct(m));
    }

    fn visit_union(&mut self, m: &Member<'a>, active: &[usize]) {
        let body = self.filter(active, |c| c.visit_union_body);
        if body.is_empty() {
            return;
        }
        self.each(&body, |h| h.enter_union(m));
        self.visit_record_fields(m.ty, &body);
        self.each(&body, |h| h.leave_union(m));
    }

    /// A stream is passed whole; only its accessor members are visited.
    fn visit_stream(&mut self, m: &Member<'a>, active: &[usize]) {
        let types = self.types;
        self.each(active, |h| h.enter_stream(m));
        if let Some(decl) = types.as_record(m.ty) {
            for (i, field) in decl.fields.iter().enumerate() {
                if !self
                    .classifier
                    .is_resource(types, field.ty, ResourceKind::Accessor)
                {
                    continue;
                }
                let acc = Member {
                    owner: m.ty,
                    origin: Origin::Field(i),
                    name: field.name.as_deref(),
                    declared_ty: field.ty,
                    ty: field.ty,
                    offset: field.offset,
                    span: field.span,
                };
                self.each(active, |h| h.handle_resource(&acc, ResourceKind::Accessor));
            }
        }
        self.each(active, |h| h.leave_stream(m));
    }

    fn visit_array(&mut self, m: &Member<'a>, active: &[usize]) {
        if self.types.requires_decomposition(m.ty) {
            self.visit_complex_array(m, active);
            return;
        }
        let simple = self.filter(active, |c| !c.visit_inside_simple_containers);
        if !simple.is_empty() {
            self.each(&simple, |h| h.handle_simple_array(m));
        }
        let complex = self.filter(active, |c| c.visit_inside_simple_containers);
        if !complex.is_empty() {
            self.visit_complex_array(m, &complex);
        }
    }

    fn visit_complex_array(&mut self, m: &Member<'a>, active: &[usize]) {
        if !self.all(active, |h| h.handle_array_type(m)) {
            return;
        }
        let (elem, count) = match self.types.get(m.ty) {
            Ty::Array {
                elem,
                len: ArrayLen::Fixed(n),
            } => (*elem, *n),
            _ => return,
        };

        self.each(active, |h| h.enter_array(m, elem));
        self.visit_element(m, elem, 0, active);
        if count > 1 {
            let nth = self.filter(active, |c| c.visit_nth_array_element);
            if !nth.is_empty() {
                for index in 1..count {
                    self.visit_element(m, elem, index, &nth);
                }
            }
        }
        self.each(active, |h| h.leave_array(m, elem));
    }

    fn visit_element(&mut self, m: &Member<'a>, elem: TyId, index: u64, active: &[usize]) {
        self.each(active, |h| h.next_element(elem, index));
        self.visit_field(&m.element(elem), active);
    }
}
