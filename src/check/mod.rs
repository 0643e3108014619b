//! Validity checks run before any code is generated for a launch site.
//!
//! The traversal-driven checkers ([`FieldChecker`], [`UnionChecker`]) run
//! together with the [`DecompositionMarker`] in the first pass. The
//! [`ArgsSizeChecker`] runs last, once decomposition flags are known.

pub mod decompose;
pub mod field;
pub mod kernel_name;
pub mod size;
pub mod union;


use crate::diagnostic::{DiagKind, Diagnostic};
use crate::span::Span;
use crate::types::{TyId, TypeTable};

pub use decompose::DecompositionMarker;
pub use field::FieldChecker;
pub use kernel_name::KernelNameChecker;
pub use size::ArgsSizeChecker;
pub use union::UnionChecker;

/// Layout entries carry sizes as `i32` and offsets as `u32`.
pub const MAX_KERNEL_OBJECT_SIZE: u64 = i32::MAX as u64;

/// The kernel object must be a complete aggregate that fits the layout
/// table, and a lambda may not capture `this`.
pub fn check_kernel_object(types: &TypeTable, kernel_object: TyId, at: Span) -> Vec<Diagnostic> {
    let Some(decl) = types.as_record(kernel_object) else {
        return vec![Diagnostic::error(
            DiagKind::InvalidKernelObject,
            format!(
                "kernel object of type '{}' is not a class or lambda",
                types.display(kernel_object)
            ),
            at,
        )];
    };
    let mut out = Vec::new();
    if decl.is_union() || !decl.complete {
        out.push(Diagnostic::error(
            DiagKind::InvalidKernelObject,
            format!(
                "kernel object of type '{}' must be a complete class or lambda",
                types.display(kernel_object)
            ),
            at,
        ));
    } else if decl.size > MAX_KERNEL_OBJECT_SIZE {
        out.push(Diagnostic::error(
            DiagKind::StructuralViolation,
            format!(
                "kernel object of type '{}' is too large ({} bytes, at most {} supported)",
                types.display(kernel_object),
                decl.size,
                MAX_KERNEL_OBJECT_SIZE
            ),
            at,
        ));
    }
    if let Some(this) = decl.lambda.as_ref().and_then(|l| l.captures_this) {
        out.push(
            Diagnostic::error(
                DiagKind::InvalidKernelObject,
                "implicit capture of 'this' is not allowed for kernel functions".to_string(),
                this,
            )
            .with_related("kernel launched here".to_string(), at),
        );
    }
    out
}
