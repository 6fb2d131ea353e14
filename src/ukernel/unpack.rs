//! Unpack: the inverse of [`crate::ukernel::pack`].
//!
//! Copies the in-bounds region of a 4-D tiled layout back into a strided
//! 2-D buffer, dropping whatever padding the pack wrote. The same transpose
//! flags describe the tiled layout and are handled the same way: one
//! size/stride swap before the loop.

use crate::error::{Error, Result};
use crate::ukernel::{
    PackKind, FLAG_TRANSPOSE_INNER, FLAG_TRANSPOSE_OUTER, MAX_OUTER_DIM, MAX_TILE_DIM,
};

/// Flat per-call descriptor. Strides are in elements. The input is the 4-D
/// `[in_size0][in_size1][in_size2][in_size3]` tiled layout.
pub struct UnpackParams<'a> {
    pub kind: PackKind,
    /// [`FLAG_TRANSPOSE_INNER`] and/or [`FLAG_TRANSPOSE_OUTER`].
    pub flags: u32,
    pub in_size0: usize,
    pub in_size1: usize,
    pub in_size2: usize,
    pub in_size3: usize,
    /// Elements between consecutive input dim-0 slices.
    pub in_stride0: usize,
    pub out_size0: usize,
    pub out_size1: usize,
    /// Elements between consecutive output rows.
    pub out_stride0: usize,
    pub input: &'a [u8],
    pub out: &'a mut [u8],
}

fn validate(p: &UnpackParams<'_>) -> Result<()> {
    let allowed = FLAG_TRANSPOSE_INNER | FLAG_TRANSPOSE_OUTER;
    if p.flags & !allowed != 0 {
        return Err(Error::InvalidArgument(format!(
            "undefined unpack flag bits {:#x}",
            p.flags & !allowed
        )));
    }
    for (name, dim) in [
        ("in_size0", p.in_size0),
        ("in_size1", p.in_size1),
        ("out_size0", p.out_size0),
        ("out_size1", p.out_size1),
    ] {
        if dim > MAX_OUTER_DIM {
            return Err(Error::InvalidArgument(format!(
                "{name}={dim} exceeds the 31-bit outer dimension range"
            )));
        }
    }
    for (name, dim) in [("in_size2", p.in_size2), ("in_size3", p.in_size3)] {
        if dim > MAX_TILE_DIM {
            return Err(Error::InvalidArgument(format!(
                "{name}={dim} outside the 15-bit tile dimension range"
            )));
        }
    }

    let mut outer_size0 = p.in_size0;
    let mut outer_size1 = p.in_size1;
    let mut tile_size0 = p.in_size2;
    let mut tile_size1 = p.in_size3;
    if p.flags & FLAG_TRANSPOSE_OUTER != 0 {
        std::mem::swap(&mut outer_size0, &mut outer_size1);
    }
    if p.flags & FLAG_TRANSPOSE_INNER != 0 {
        std::mem::swap(&mut tile_size0, &mut tile_size1);
    }
    let cover0 = outer_size0
        .checked_mul(tile_size0)
        .ok_or_else(|| Error::InvalidArgument("input extent overflow".into()))?;
    let cover1 = outer_size1
        .checked_mul(tile_size1)
        .ok_or_else(|| Error::InvalidArgument("input extent overflow".into()))?;
    if cover0 < p.out_size0 || cover1 < p.out_size1 {
        return Err(Error::InvalidArgument(format!(
            "tiled input of {cover0}x{cover1} does not cover output of {}x{}",
            p.out_size0, p.out_size1
        )));
    }

    let log2 = p.kind.elem().size_log2();
    if p.in_size0 > 0 && p.in_size1 > 0 && p.in_size2 > 0 && p.in_size3 > 0 {
        let row = p.in_size1 * p.in_size2 * p.in_size3;
        let need = ((p.in_size0 - 1)
            .checked_mul(p.in_stride0)
            .and_then(|v| v.checked_add(row))
            .ok_or_else(|| Error::InvalidArgument("input extent overflow".into()))?)
            << log2;
        if p.input.len() < need {
            return Err(Error::InvalidArgument(format!(
                "input buffer of {} bytes, need {need}",
                p.input.len()
            )));
        }
    }
    if p.out_size0 > 0 && p.out_size1 > 0 {
        let need = ((p.out_size0 - 1)
            .checked_mul(p.out_stride0)
            .and_then(|v| v.checked_add(p.out_size1))
            .ok_or_else(|| Error::InvalidArgument("output extent overflow".into()))?)
            << log2;
        if p.out.len() < need {
            return Err(Error::InvalidArgument(format!(
                "output buffer of {} bytes, need {need}",
                p.out.len()
            )));
        }
    }
    Ok(())
}

/// Copies the valid region of a tiled layout back to 2-D.
pub fn unpack(mut params: UnpackParams<'_>) -> Result<()> {
    validate(&params)?;
    if params.out_size0 == 0 || params.out_size1 == 0 {
        return Ok(());
    }

    let e = params.kind.elem().size();
    let mut outer_size0 = params.in_size0;
    let mut outer_size1 = params.in_size1;
    let mut tile_size0 = params.in_size2;
    let mut tile_size1 = params.in_size3;
    let mut in_stride_l0 = params.in_stride0;
    let mut in_stride1 = params.in_size2 * params.in_size3;
    let mut l2 = params.in_size3;
    let mut l3 = 1usize;
    if params.flags & FLAG_TRANSPOSE_OUTER != 0 {
        std::mem::swap(&mut outer_size0, &mut outer_size1);
        std::mem::swap(&mut in_stride_l0, &mut in_stride1);
    }
    if params.flags & FLAG_TRANSPOSE_INNER != 0 {
        std::mem::swap(&mut tile_size0, &mut tile_size1);
        std::mem::swap(&mut l2, &mut l3);
    }

    let in_ptr = params.input.as_ptr();
    let out_ptr = params.out.as_mut_ptr();
    for r0 in 0..outer_size0 {
        let i0 = r0 * tile_size0;
        if i0 >= params.out_size0 {
            break;
        }
        let rows = (params.out_size0 - i0).min(tile_size0);
        for r1 in 0..outer_size1 {
            let i1 = r1 * tile_size1;
            if i1 >= params.out_size1 {
                break;
            }
            let cols = (params.out_size1 - i1).min(tile_size1);
            // SAFETY: tile origin bounded by the validated input extent,
            // output region by the validated output extent; rows/cols are
            // clamped to the in-bounds sub-region.
            unsafe {
                let tile = in_ptr.add((r0 * in_stride_l0 + r1 * in_stride1) * e);
                let dst = out_ptr.add((i0 * params.out_stride0 + i1) * e);
                if l3 == 1 {
                    for rr in 0..rows {
                        std::ptr::copy_nonoverlapping(
                            tile.add(rr * l2 * e),
                            dst.add(rr * params.out_stride0 * e),
                            cols * e,
                        );
                    }
                } else {
                    for rr in 0..rows {
                        for cc in 0..cols {
                            std::ptr::copy_nonoverlapping(
                                tile.add((rr * l2 + cc * l3) * e),
                                dst.add((rr * params.out_stride0 + cc) * e),
                                e,
                            );
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn uncovered_output_rejected() {
        let input = [0u8; 64];
        let mut out = [0u8; 100];
        let p = UnpackParams {
            kind: PackKind::F32F32,
            flags: 0,
            in_size0: 1,
            in_size1: 1,
            in_size2: 4,
            in_size3: 4,
            in_stride0: 16,
            out_size0: 5,
            out_size1: 5,
            out_stride0: 5,
            input: &input,
            out: &mut out,
        };
        assert!(matches!(unpack(p), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn empty_output_is_noop() {
        let input = [0u8; 64];
        let mut out = [0u8; 0];
        let p = UnpackParams {
            kind: PackKind::I8I8,
            flags: 0,
            in_size0: 2,
            in_size1: 2,
            in_size2: 4,
            in_size3: 4,
            in_stride0: 32,
            out_size0: 0,
            out_size1: 0,
            out_stride0: 0,
            input: &input,
            out: &mut out,
        };
        assert!(unpack(p).is_ok());
    }
}
