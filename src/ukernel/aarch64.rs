//! aarch64 tile routines (NEON).

use std::arch::aarch64::*;

use crate::ukernel::tile::TileGeometry;
use crate::ukernel::FLAG_ACCUMULATE;

pub(crate) fn neon_available() -> bool {
    std::arch::is_aarch64_feature_detected!("neon")
}

/// f32 8x8x1 tile: two q-registers of RHS per K step, FMA per output row.
///
/// # Safety
///
/// Caller guarantees NEON support and panels/output sized for the 8x8x1
/// geometry over `k` steps.
#[target_feature(enable = "neon")]
pub(crate) unsafe fn mmt4d_tile_f32_8x8x1_neon(
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

    let mut acc = [[vdupq_n_f32(0.0); 2]; 8];
    if flags & FLAG_ACCUMULATE != 0 {
        for (i, row) in acc.iter_mut().enumerate() {
            row[0] = vld1q_f32(out.add(i * 8));
            row[1] = vld1q_f32(out.add(i * 8 + 4));
        }
    }

    for kk in 0..k {
        let r0 = vld1q_f32(rhs.add(kk * 8));
        let r1 = vld1q_f32(rhs.add(kk * 8 + 4));
        let l = lhs.add(kk * 8);
        for (i, row) in acc.iter_mut().enumerate() {
            let li = vdupq_n_f32(*l.add(i));
            row[0] = vfmaq_f32(row[0], li, r0);
            row[1] = vfmaq_f32(row[1], li, r1);
        }
    }

    for (i, row) in acc.iter().enumerate() {
        vst1q_f32(out.add(i * 8), row[0]);
        vst1q_f32(out.add(i * 8 + 4), row[1]);
    }
}
