use crate::types::classify::ResourceKind;
use crate::types::{TyId, TypeTable};
use crate::visit::{Capabilities, FieldHandler, Member};

/// Bottom-up computation of the persisted "requires decomposition" flag.
///
/// Each open struct, array or stream scope collects whether any leaf below
/// it is a resource or a pointer. Leaving a struct or an array persists
/// the collected flag on its type and propagates a `true` outward. Union
/// bodies are never seen, so unions contribute nothing.
pub struct DecompositionMarker<'a> {
    types: &'a TypeTable,
    kernel_object: TyId,
    collected: Vec<bool>,
}

impl<'a> DecompositionMarker<'a> {
    pub fn new(types: &'a TypeTable, kernel_object: TyId) -> Self {
        Self {
            types,
            kernel_object,
            collected: vec![false],
        }
    }

    /// Persist the kernel object's own flag.
    pub fn finish(self) -> bool {
        let required = self.collected.first().copied().unwrap_or(false);
        self.types.persist_decomposition(self.kernel_object, required);
        required
    }

    fn mark(&mut self) {
        if let Some(top) = self.collected.last_mut() {
            *top = true;
        }
    }

    fn close(&mut self, ty: TyId) {
        let Some(required) = self.collected.pop() else {
            return;
        };
        self.types.persist_decomposition(ty, required);
        if required {
            self.mark();
        }
    }
}

impl FieldHandler for DecompositionMarker<'_> {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            visit_nth_array_element: false,
            ..Capabilities::default()
        }
    }

    fn handle_resource(&mut self, _: &Member<'_>, _: ResourceKind) {
        self.mark();
    }

    fn handle_pointer(&mut self, _: &Member<'_>) {
        self.mark();
    }

    fn enter_struct(&mut self, _: &Member<'_>) {
        self.collected.push(false);
    }

    fn leave_struct(&mut self, m: &Member<'_>) {
        self.close(m.ty);
    }

    /// Stream members are already accounted for by the stream itself.
    fn enter_stream(&mut self, _: &Member<'_>) {
        self.collected.push(false);
    }

    fn leave_stream(&mut self, _: &Member<'_>) {
        self.collected.pop();
    }

    fn enter_array(&mut self, _: &Member<'_>, _: TyId) {
        self.collected.push(false);
    }

    fn leave_array(&mut self, m: &Member<'_>, _: TyId) {
        self.close(m.ty);
    }
}
