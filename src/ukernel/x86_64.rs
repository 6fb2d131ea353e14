//! x86_64 tile routines (AVX2/FMA).

use std::arch::x86_64::*;

use crate::ukernel::tile::TileGeometry;
use crate::ukernel::FLAG_ACCUMULATE;

pub(crate) fn avx2_available() -> bool {
    is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
}

/// f32 8x8x1 tile: one ymm of RHS per K step, one FMA per output row.
///
/// # Safety
///
/// Caller guarantees AVX2+FMA support and panels/output sized for the
/// 8x8x1 geometry over `k` steps.
#[target_feature(enable = "avx2", enable = "fma")]
pub(crate) unsafe fn mmt4d_tile_f32_8x8x1_avx2(
    out_tile: *mut u8,
    lhs_panel: *const u8,
    rhs_panel: *const u8,
    k: usize,
    flags: u32,
    _geom: &TileGeometry,
) {
    let out = out_tile as *mut f32;
    let lhs = lhs_panel as *const f32;
    let rhs = rhs_panel as *const f32;

    let mut acc = [_mm256_setzero_ps(); 8];
    if flags & FLAG_ACCUMULATE != 0 {
        for (i, row) in acc.iter_mut().enumerate() {
            *row = _mm256_loadu_ps(out.add(i * 8));
        }
    }

    for kk in 0..k {
        let r = _mm256_loadu_ps(rhs.add(kk * 8));
        let l = lhs.add(kk * 8);
        for (i, row) in acc.iter_mut().enumerate() {
            *row = _mm256_fmadd_ps(_mm256_broadcast_ss(&*l.add(i)), r, *row);
        }
    }

    for (i, row) in acc.iter().enumerate() {
        _mm256_storeu_ps(out.add(i * 8), *row);
    }
}
