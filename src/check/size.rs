use crate::diagnostic::{DiagKind, Diagnostic};
use crate::kernel::init_method_name;
use crate::span::Span;
use crate::types::classify::ResourceKind;
use crate::types::TypeTable;
use crate::visit::{Capabilities, FieldHandler, Member};

/// Sums the bytes of every parameter the flattening would produce and
/// warns when the total exceeds the target's budget.
pub struct ArgsSizeChecker<'a> {
    types: &'a TypeTable,
    simd: bool,
    budget: u64,
    total: u64,
}

impl<'a> ArgsSizeChecker<'a> {
    pub fn new(types: &'a TypeTable, simd: bool, budget: u64) -> Self {
        Self {
            types,
            simd,
            budget,
            total: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// `None` when the parameters fit.
    pub fn finish(self, span: Span) -> Option<Diagnostic> {
        if self.total <= self.budget {
            return None;
        }
        Some(
            Diagnostic::warning(
                DiagKind::SizeBudgetExceeded,
                format!(
                    "size of kernel arguments ({} bytes) may exceed the supported maximum of {} bytes on a device",
                    self.total, self.budget
                ),
                span,
            )
            .with_help("pass large data through a buffer accessor instead of by value".to_string()),
        )
    }

    fn add(&mut self, m: &Member<'_>) {
        self.total = self.total.saturating_add(self.types.size_of(m.ty));
    }
}

impl FieldHandler for ArgsSizeChecker<'_> {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            visit_inside_simple_containers: false,
            ..Capabilities::default()
        }
    }

    fn handle_resource(&mut self, m: &Member<'_>, kind: ResourceKind) {
        match kind {
            ResourceKind::Accessor | ResourceKind::Sampler => {
                let types = self.types;
                let bytes: u64 = types
                    .as_record(m.ty)
                    .and_then(|d| d.method(init_method_name(kind, self.simd)))
                    .map(|init| {
                        init.params
                            .iter()
                            .fold(0u64, |acc, &p| acc.saturating_add(types.size_of(p)))
                    })
                    .unwrap_or(0);
                self.total = self.total.saturating_add(bytes);
            }
            ResourceKind::Stream | ResourceKind::Half => self.add(m),
            ResourceKind::SpecConstant => {}
        }
    }

    fn handle_pointer(&mut self, _: &Member<'_>) {
        self.total = self.total.saturating_add(self.types.pointer_size());
    }

    fn handle_scalar(&mut self, m: &Member<'_>) {
        self.add(m);
    }

    fn handle_non_decomp_struct(&mut self, m: &Member<'_>) {
        self.add(m);
    }

    fn handle_union_type(&mut self, m: &Member<'_>) -> bool {
        self.add(m);
        true
    }

    fn handle_simple_array(&mut self, m: &Member<'_>) {
        self.add(m);
    }
}
