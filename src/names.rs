//! Kernel and specialization-constant naming.
//!
//! Real front ends delegate to the target ABI mangler; the lowering only
//! needs two properties from a name: it is a valid identifier, and it is
//! the same for the same type in every compilation of the unit.

use crate::types::{TyId, TypeTable};

/// Supplies the names the lowering cannot compute itself.
pub trait NameOracle {
    /// Device symbol for a kernel whose name type is `ty`.
    fn mangled_name(&self, types: &TypeTable, ty: TyId) -> String;
    /// Human-readable name stable across host and device compilations.
    fn stable_name(&self, types: &TypeTable, ty: TyId) -> String;
}

/// Default oracle: identifier-safe spelling plus a short content digest of
/// the full type spelling, so that `ns::a_b` and `ns_a::b` stay distinct.
#[derive(Clone, Copy, Debug, Default)]
pub struct DigestNames;

impl NameOracle for DigestNames {
    fn mangled_name(&self, types: &TypeTable, ty: TyId) -> String {
        let spelled = types.display(ty);
        let digest = blake3::hash(spelled.as_bytes());
        let hex = digest.to_hex();
        format!("_ZTS{}_{}", sanitize(&spelled), &hex[..8])
    }

    fn stable_name(&self, types: &TypeTable, ty: TyId) -> String {
        types.display(ty)
    }
}

/// Collapse every run of non-identifier characters into one underscore.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut gap = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if gap && !out.is_empty() {
                out.push('_');
            }
            gap = false;
            out.push(c);
        } else {
            gap = true;
        }
    }
    out
}
