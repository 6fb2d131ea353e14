//! Generic scalar tile routines.
//!
//! Correct for any validated geometry on any architecture; the registries
//! fall back here when no specialized row matches. Accumulation runs in a
//! fixed-size local scratch so the output is written once per tile.

use half::f16;

use crate::ukernel::mmt4d::{Mmt4dKind, TILE_GENERIC_MAX_BYTES};
use crate::ukernel::tile::{Mmt4dTileFn, TileGeometry};
use crate::ukernel::FLAG_ACCUMULATE;

const MAX_F32_ELEMS: usize = TILE_GENERIC_MAX_BYTES / 4;
const MAX_I32_ELEMS: usize = TILE_GENERIC_MAX_BYTES / 4;

pub(crate) fn select_mmt4d(kind: Mmt4dKind) -> Mmt4dTileFn {
    match kind {
        Mmt4dKind::F32F32F32 => mmt4d_tile_f32,
        Mmt4dKind::F16F16F32 => mmt4d_tile_f16f16f32,
        Mmt4dKind::I8I8I32 => mmt4d_tile_i8i8i32,
    }
}

/// f32 = f32 * f32 tile.
///
/// # Safety
///
/// Panels and output must cover `k` steps of the validated geometry, and
/// `m0 * n0` must fit the generic scratch (checked by mmt4d validation).
pub(crate) unsafe fn mmt4d_tile_f32(
    out_tile: *mut u8,
    lhs_panel: *const u8,
    rhs_panel: *const u8,
    k: usize,
    flags: u32,
    geom: &TileGeometry,
) {
    let (m0, n0, k0) = (geom.m0, geom.n0, geom.k0);
    let out = out_tile as *mut f32;
    let lhs = lhs_panel as *const f32;
    let rhs = rhs_panel as *const f32;
    let mut acc = [0f32; MAX_F32_ELEMS];
    if flags & FLAG_ACCUMULATE != 0 {
        std::ptr::copy_nonoverlapping(out, acc.as_mut_ptr(), m0 * n0);
    }
    for kk in 0..k {
        let lhs_k = lhs.add(kk * m0 * k0);
        let rhs_k = rhs.add(kk * n0 * k0);
        for i in 0..m0 {
            for j in 0..n0 {
                let mut sum = acc[i * n0 + j];
                for l in 0..k0 {
                    sum += *lhs_k.add(i * k0 + l) * *rhs_k.add(j * k0 + l);
                }
                acc[i * n0 + j] = sum;
            }
        }
    }
    std::ptr::copy_nonoverlapping(acc.as_ptr(), out, m0 * n0);
}

/// f32 = f16 * f16 tile, accumulating in f32.
///
/// # Safety
///
/// Same contract as [`mmt4d_tile_f32`].
pub(crate) unsafe fn mmt4d_tile_f16f16f32(
    out_tile: *mut u8,
    lhs_panel: *const u8,
    rhs_panel: *const u8,
    k: usize,
    flags: u32,
    geom: &TileGeometry,
) {
    let (m0, n0, k0) = (geom.m0, geom.n0, geom.k0);
    let out = out_tile as *mut f32;
    let lhs = lhs_panel as *const u16;
    let rhs = rhs_panel as *const u16;
    let mut acc = [0f32; MAX_F32_ELEMS];
    if flags & FLAG_ACCUMULATE != 0 {
        std::ptr::copy_nonoverlapping(out, acc.as_mut_ptr(), m0 * n0);
    }
    for kk in 0..k {
        let lhs_k = lhs.add(kk * m0 * k0);
        let rhs_k = rhs.add(kk * n0 * k0);
        for i in 0..m0 {
            for j in 0..n0 {
                let mut sum = acc[i * n0 + j];
                for l in 0..k0 {
                    let a = f16::from_bits(*lhs_k.add(i * k0 + l)).to_f32();
                    let b = f16::from_bits(*rhs_k.add(j * k0 + l)).to_f32();
                    sum += a * b;
                }
                acc[i * n0 + j] = sum;
            }
        }
    }
    std::ptr::copy_nonoverlapping(acc.as_ptr(), out, m0 * n0);
}

/// i32 = i8 * i8 tile, accumulating in i32.
///
/// # Safety
///
/// Same contract as [`mmt4d_tile_f32`].
pub(crate) unsafe fn mmt4d_tile_i8i8i32(
    out_tile: *mut u8,
    lhs_panel: *const u8,
    rhs_panel: *const u8,
    k: usize,
    flags: u32,
    geom: &TileGeometry,
) {
    let (m0, n0, k0) = (geom.m0, geom.n0, geom.k0);
    let out = out_tile as *mut i32;
    let lhs = lhs_panel as *const i8;
    let rhs = rhs_panel as *const i8;
    let mut acc = [0i32; MAX_I32_ELEMS];
    if flags & FLAG_ACCUMULATE != 0 {
        std::ptr::copy_nonoverlapping(out, acc.as_mut_ptr(), m0 * n0);
    }
    for kk in 0..k {
        let lhs_k = lhs.add(kk * m0 * k0);
        let rhs_k = rhs.add(kk * n0 * k0);
        for i in 0..m0 {
            for j in 0..n0 {
                let mut sum = acc[i * n0 + j];
                for l in 0..k0 {
                    sum += *lhs_k.add(i * k0 + l) as i32 * *rhs_k.add(j * k0 + l) as i32;
                }
                acc[i * n0 + j] = sum;
            }
        }
    }
    std::ptr::copy_nonoverlapping(acc.as_ptr(), out, m0 * n0);
}

/// Packs `num_tiles` consecutive tiles from a 2-D source row chunk.
///
/// Row-copy fast path when the innermost output stride is 1 (no inner
/// transpose); element-wise otherwise.
///
/// # Safety
///
/// Source must hold `tile0` rows of `num_tiles * tile1` valid elements at
/// `in_stride0` element pitch; output must hold `num_tiles` tiles at
/// `out_tile_stride` element pitch.
pub(crate) unsafe fn pack_tile_any(
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
) {
    for t in 0..num_tiles {
        let tile_out = out.add(t * out_tile_stride * elem_size);
        let tile_in = input.add(t * tile1 * elem_size);
        if l3 == 1 {
            for i0 in 0..tile0 {
                std::ptr::copy_nonoverlapping(
                    tile_in.add(i0 * in_stride0 * elem_size),
                    tile_out.add(i0 * l2 * elem_size),
                    tile1 * elem_size,
                );
            }
        } else {
            for i0 in 0..tile0 {
                for i1 in 0..tile1 {
                    std::ptr::copy_nonoverlapping(
                        tile_in.add((i0 * in_stride0 + i1) * elem_size),
                        tile_out.add((i0 * l2 + i1 * l3) * elem_size),
                        elem_size,
                    );
                }
            }
        }
    }
}
