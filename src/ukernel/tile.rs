//! Read-only tile-routine registries.
//!
//! Architecture-specific inner loops are registered in explicit static
//! tables and selected by a pure function of element kind and tile geometry,
//! resolved once per call. The registry is passed by reference everywhere so
//! there is no hidden process-wide mutable state; `TileRegistry::host()`
//! returns the table for the compiled-in architecture with generic scalar
//! fallbacks behind the specialized rows.

use crate::ukernel::generic;
use crate::ukernel::mmt4d::Mmt4dKind;

/// Inner tile sizes, shared with every tile routine.
#[derive(Debug, Clone, Copy)]
pub struct TileGeometry {
    pub m0: usize,
    pub n0: usize,
    pub k0: usize,
}

/// Computes one M0xN0 output tile: the K-loop over one LHS panel and one RHS
/// panel, honoring `FLAG_ACCUMULATE`. The only architecture-specialized unit
/// of the mmt4d operation.
pub type Mmt4dTileFn = unsafe fn(
    out_tile: *mut u8,
    lhs_panel: *const u8,
    rhs_panel: *const u8,
    k: usize,
    flags: u32,
    geom: &TileGeometry,
);

/// Writes `num_tiles` consecutive tiles of an already-padded source row
/// chunk into the 4-D output layout. `l2`/`l3` are the element strides of
/// the inner two output dimensions (swapped once by the caller for
/// transpose-inner).
pub type PackTileFn = unsafe fn(
    out: *mut u8,
    input: *const u8,
    num_tiles: usize,
    out_tile_stride: usize,
    in_stride0: usize,
    elem_size: usize,
    tile0: usize,
    tile1: usize,
    l2: usize,
    l3: usize,
);

pub struct Mmt4dTileEntry {
    pub kind: Mmt4dKind,
    pub m0: usize,
    pub n0: usize,
    pub k0: usize,
    pub available: fn() -> bool,
    pub func: Mmt4dTileFn,
}

pub struct PackTileEntry {
    pub elem_size: usize,
    pub available: fn() -> bool,
    pub func: PackTileFn,
}

/// Immutable routine table for one architecture.
pub struct TileRegistry {
    mmt4d: &'static [Mmt4dTileEntry],
    pack: &'static [PackTileEntry],
}

#[cfg(target_arch = "x86_64")]
static HOST_REGISTRY: TileRegistry = TileRegistry {
    mmt4d: &[Mmt4dTileEntry {
        kind: Mmt4dKind::F32F32F32,
        m0: 8,
        n0: 8,
        k0: 1,
        available: crate::ukernel::x86_64::avx2_available,
        func: crate::ukernel::x86_64::mmt4d_tile_f32_8x8x1_avx2,
    }],
    pack: &[],
};

#[cfg(target_arch = "aarch64")]
static HOST_REGISTRY: TileRegistry = TileRegistry {
    mmt4d: &[Mmt4dTileEntry {
        kind: Mmt4dKind::F32F32F32,
        m0: 8,
        n0: 8,
        k0: 1,
        available: crate::ukernel::aarch64::neon_available,
        func: crate::ukernel::aarch64::mmt4d_tile_f32_8x8x1_neon,
    }],
    pack: &[],
};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
static HOST_REGISTRY: TileRegistry = TileRegistry {
    mmt4d: &[],
    pack: &[],
};

/// Registry with no architecture rows; every selection lands on the generic
/// scalar routines. Useful for differential testing against the host table.
static GENERIC_REGISTRY: TileRegistry = TileRegistry {
    mmt4d: &[],
    pack: &[],
};

impl TileRegistry {
    /// The registry for the compiled-in architecture.
    pub fn host() -> &'static TileRegistry {
        &HOST_REGISTRY
    }

    pub fn generic() -> &'static TileRegistry {
        &GENERIC_REGISTRY
    }

    /// Selects the mmt4d tile routine for a kind + tile-size combination.
    /// Pure: same inputs always yield the same routine. The generic fallback
    /// accepts any validated geometry, so selection cannot fail.
    pub fn select_mmt4d(&self, kind: Mmt4dKind, m0: usize, n0: usize, k0: usize) -> Mmt4dTileFn {
        for entry in self.mmt4d {
            if entry.kind == kind
                && entry.m0 == m0
                && entry.n0 == n0
                && entry.k0 == k0
                && (entry.available)()
            {
                log::trace!("mmt4d tile {kind:?} {m0}x{n0}x{k0}: architecture routine");
                return entry.func;
            }
        }
        log::trace!("mmt4d tile {kind:?} {m0}x{n0}x{k0}: generic routine");
        generic::select_mmt4d(kind)
    }

    /// Selects the pack tile routine for an element size.
    pub fn select_pack(&self, elem_size: usize) -> PackTileFn {
        for entry in self.pack {
            if entry.elem_size == elem_size && (entry.available)() {
                return entry.func;
            }
        }
        generic::pack_tile_any
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_registry_selects_generic() {
        let f = TileRegistry::generic().select_mmt4d(Mmt4dKind::F32F32F32, 8, 8, 1);
        let g = generic::select_mmt4d(Mmt4dKind::F32F32F32);
        assert_eq!(f as usize, g as usize);
    }

    #[test]
    fn selection_is_stable() {
        let reg = TileRegistry::host();
        let a = reg.select_mmt4d(Mmt4dKind::I8I8I32, 4, 4, 1);
        let b = reg.select_mmt4d(Mmt4dKind::I8I8I32, 4, 4, 1);
        assert_eq!(a as usize, b as usize);
    }
}
