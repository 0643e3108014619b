//! Host-side description of every synthesized kernel: the per-kernel
//! layout tables and the specialization constants used by the unit.

pub mod emit;
pub mod layout;

#[cfg(test)]
mod tests;

use std::fmt;

use crate::span::Span;
use crate::types::TyId;

pub use layout::LayoutEmitter;

/// Kind tag of a layout entry, as understood by the host runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamKind {
    Accessor,
    StdLayout,
    Sampler,
    Pointer,
}

impl ParamKind {
    pub fn tag(self) -> &'static str {
        match self {
            ParamKind::Accessor => "accessor",
            ParamKind::StdLayout => "std_layout",
            ParamKind::Sampler => "sampler",
            ParamKind::Pointer => "pointer",
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kind_{}", self.tag())
    }
}

/// `(kind, info, offset)`: info is the byte size for plain data and
/// pointers, the encoded target and dimensions for accessors, and the
/// init argument size for samplers. Offset is relative to the start of
/// the kernel object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutEntry {
    pub kind: ParamKind,
    pub info: i32,
    pub offset: u32,
}

/// Everything the host runtime needs to know about one kernel.
#[derive(Clone, Debug)]
pub struct KernelDescriptor {
    /// Device symbol name.
    pub name: String,
    pub stable_name: String,
    /// Kernel name type as spelled in source.
    pub display_name: String,
    pub name_type: TyId,
    pub span: Span,
    pub is_simd: bool,
    /// The kernel body reaches the `this_item` free function.
    pub calls_this_item: bool,
    pub entries: Vec<LayoutEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecConstant {
    pub stable_name: String,
    pub id_type: TyId,
}

/// Per-unit, append-only accumulation of kernel descriptors, owned by
/// the driver and consumed once by [`emit::render_header`].
#[derive(Clone, Debug, Default)]
pub struct IntegrationTable {
    kernels: Vec<KernelDescriptor>,
    spec_constants: Vec<SpecConstant>,
}

impl IntegrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_kernel(&mut self, desc: KernelDescriptor) {
        self.kernels.push(desc);
    }

    pub fn add_spec_constant(&mut self, spec: SpecConstant) {
        self.spec_constants.push(spec);
    }

    pub fn kernels(&self) -> &[KernelDescriptor] {
        &self.kernels
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty() && self.spec_constants.is_empty()
    }

    /// Sorted by stable name, one per ID type.
    pub fn unique_spec_constants(&self) -> Vec<&SpecConstant> {
        let mut sorted: Vec<&SpecConstant> = self.spec_constants.iter().collect();
        sorted.sort_by(|a, b| a.stable_name.cmp(&b.stable_name));
        let mut seen = std::collections::BTreeSet::new();
        sorted.retain(|s| seen.insert(s.id_type));
        sorted
    }
}
