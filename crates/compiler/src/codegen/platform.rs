//! Target-specific lowering snippets.
//!
//! The profile fixes the atomic strategy; this module knows which CMSIS
//! intrinsics implement it and how wide each exclusive access is.

use crate::types::Prim;

/// `__LDREX`/`__STREX` intrinsic pair for an integer width.
pub(super) fn ldrex_pair(prim: Prim) -> (&'static str, &'static str) {
    match prim.bits() {
        8 => ("__LDREXB", "__STREXB"),
        16 => ("__LDREXH", "__STREXH"),
        _ => ("__LDREXW", "__STREXW"),
    }
}
