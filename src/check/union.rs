use crate::diagnostic::{DiagKind, Diagnostic};
use crate::types::classify::ResourceKind;
use crate::types::TypeTable;
use crate::visit::{Capabilities, FieldHandler, Member};

/// Rejects device resources reachable through a union member. The
/// flattened form has no tag telling which alternative is live.
pub struct UnionChecker<'a> {
    types: &'a TypeTable,
    depth: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> UnionChecker<'a> {
    pub fn new(types: &'a TypeTable) -> Self {
        Self {
            types,
            depth: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn finish(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

impl FieldHandler for UnionChecker<'_> {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            visit_union_body: true,
            visit_nth_array_element: false,
            ..Capabilities::default()
        }
    }

    fn handle_resource(&mut self, m: &Member<'_>, kind: ResourceKind) {
        // half is a plain 16-bit value and may live in a union.
        if self.depth == 0 || kind == ResourceKind::Half {
            return;
        }
        self.diagnostics.push(
            Diagnostic::error(
                DiagKind::UnionResourceViolation,
                format!(
                    "{} type '{}' cannot be a union member of a kernel parameter",
                    kind.name(),
                    self.types.display(m.ty)
                ),
                m.span,
            )
            .with_note("union members are passed as raw bytes and cannot be rebuilt".to_string()),
        );
    }

    fn enter_union(&mut self, _: &Member<'_>) {
        self.depth += 1;
    }

    fn leave_union(&mut self, _: &Member<'_>) {
        self.depth -= 1;
    }
}
