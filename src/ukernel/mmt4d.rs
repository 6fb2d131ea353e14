//! Tiled matmul-accumulate over 4-D blocked layouts.
//!
//! Shapes: LHS is `M x K` panels of `M0 x K0` elements, RHS is `N x K`
//! panels of `N0 x K0`, OUT is `M x N` tiles of `M0 x N0`. One call computes
//! `OUT (+)= LHS * RHS^T` at tile granularity. The outer M/N loop nest is
//! shared across every element kind and architecture; only the inner tile
//! routine is specialized.

use crate::error::{Error, Result};
use crate::ukernel::tile::{Mmt4dTileFn, TileGeometry, TileRegistry};
use crate::ukernel::{ElemType, FLAG_ACCUMULATE, MAX_OUTER_DIM, MAX_TILE_DIM};

/// Upper bound on `M0 * N0 * out_elem_size`: one tile must fit the generic
/// routine's fixed accumulator scratch.
pub const TILE_GENERIC_MAX_BYTES: usize = 4096;

/// Row threshold above which the outer M loop runs on the rayon pool.
/// Below it the parallel split costs more than it saves.
const PARALLEL_MIN_ROWS: usize = 32;

/// Element-kind combinations supported by the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mmt4dKind {
    F32F32F32,
    F16F16F32,
    I8I8I32,
}

impl Mmt4dKind {
    pub const fn lhs_type(self) -> ElemType {
        match self {
            Self::F32F32F32 => ElemType::F32,
            Self::F16F16F32 => ElemType::F16,
            Self::I8I8I32 => ElemType::I8,
        }
    }

    pub const fn rhs_type(self) -> ElemType {
        self.lhs_type()
    }

    pub const fn out_type(self) -> ElemType {
        match self {
            Self::F32F32F32 | Self::F16F16F32 => ElemType::F32,
            Self::I8I8I32 => ElemType::I32,
        }
    }
}

/// Flat per-call descriptor. Strides are in elements; buffers are raw bytes
/// of the respective element types. Stack-allocated per call, never
/// persisted.
pub struct Mmt4dParams<'a> {
    pub kind: Mmt4dKind,
    /// Only [`FLAG_ACCUMULATE`] is defined for this operation.
    pub flags: u32,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub m0: usize,
    pub n0: usize,
    pub k0: usize,
    pub lhs: &'a [u8],
    /// Elements between consecutive LHS panel rows. At least `K * M0 * K0`.
    pub lhs_stride: usize,
    pub rhs: &'a [u8],
    /// Elements between consecutive RHS panel rows. At least `K * N0 * K0`.
    pub rhs_stride: usize,
    pub out: &'a mut [u8],
    /// Elements between consecutive OUT tile rows. At least `N * M0 * N0`.
    pub out_stride: usize,
}

fn checked_row_extent(rows: usize, stride: usize, content: usize) -> Result<usize> {
    if rows == 0 {
        return Ok(0);
    }
    (rows - 1)
        .checked_mul(stride)
        .and_then(|v| v.checked_add(content))
        .ok_or_else(|| Error::InvalidArgument("buffer extent overflow".into()))
}

/// All failure modes are hit here so the loop below can be treated as
/// infallible.
fn validate(p: &Mmt4dParams<'_>) -> Result<()> {
    if p.flags & !FLAG_ACCUMULATE != 0 {
        return Err(Error::InvalidArgument(format!(
            "undefined mmt4d flag bits {:#x}",
            p.flags & !FLAG_ACCUMULATE
        )));
    }
    for (name, dim) in [("M", p.m), ("N", p.n), ("K", p.k)] {
        if dim > MAX_OUTER_DIM {
            return Err(Error::InvalidArgument(format!(
                "{name}={dim} exceeds the 31-bit outer dimension range"
            )));
        }
    }
    for (name, dim) in [("M0", p.m0), ("N0", p.n0), ("K0", p.k0)] {
        if dim == 0 || dim > MAX_TILE_DIM {
            return Err(Error::InvalidArgument(format!(
                "{name}={dim} outside the 15-bit tile dimension range"
            )));
        }
    }
    let out_size = p.kind.out_type().size();
    let tile_bytes = p.m0 * p.n0 * out_size;
    if tile_bytes > TILE_GENERIC_MAX_BYTES {
        return Err(Error::ResourceExhausted(format!(
            "tile of {tile_bytes} bytes exceeds the {TILE_GENERIC_MAX_BYTES} byte scratch"
        )));
    }

    let lhs_content = p
        .k
        .checked_mul(p.m0)
        .and_then(|v| v.checked_mul(p.k0))
        .ok_or_else(|| Error::InvalidArgument("lhs panel extent overflow".into()))?;
    let rhs_content = p
        .k
        .checked_mul(p.n0)
        .and_then(|v| v.checked_mul(p.k0))
        .ok_or_else(|| Error::InvalidArgument("rhs panel extent overflow".into()))?;
    let out_content = p
        .n
        .checked_mul(p.m0)
        .and_then(|v| v.checked_mul(p.n0))
        .ok_or_else(|| Error::InvalidArgument("out row extent overflow".into()))?;
    if p.m > 0 && p.lhs_stride < lhs_content {
        return Err(Error::InvalidArgument(format!(
            "lhs_stride {} below panel row of {lhs_content} elements",
            p.lhs_stride
        )));
    }
    if p.n > 0 && p.rhs_stride < rhs_content {
        return Err(Error::InvalidArgument(format!(
            "rhs_stride {} below panel row of {rhs_content} elements",
            p.rhs_stride
        )));
    }
    if p.m > 0 && p.out_stride < out_content {
        return Err(Error::InvalidArgument(format!(
            "out_stride {} below tile row of {out_content} elements",
            p.out_stride
        )));
    }

    // Degenerate shapes read or write nothing; only the buffers a call will
    // actually touch are length-checked.
    let lhs_log2 = p.kind.lhs_type().size_log2();
    let rhs_log2 = p.kind.rhs_type().size_log2();
    let out_log2 = p.kind.out_type().size_log2();
    let reads = p.m > 0 && p.n > 0 && p.k > 0;
    let writes = p.m > 0 && p.n > 0;
    let need_lhs = if reads {
        checked_row_extent(p.m, p.lhs_stride, lhs_content)? << lhs_log2
    } else {
        0
    };
    let need_rhs = if reads {
        checked_row_extent(p.n, p.rhs_stride, rhs_content)? << rhs_log2
    } else {
        0
    };
    let need_out = if writes {
        checked_row_extent(p.m, p.out_stride, out_content)? << out_log2
    } else {
        0
    };
    if p.lhs.len() < need_lhs {
        return Err(Error::InvalidArgument(format!(
            "lhs buffer of {} bytes, need {need_lhs}",
            p.lhs.len()
        )));
    }
    if p.rhs.len() < need_rhs {
        return Err(Error::InvalidArgument(format!(
            "rhs buffer of {} bytes, need {need_rhs}",
            p.rhs.len()
        )));
    }
    if p.out.len() < need_out {
        return Err(Error::InvalidArgument(format!(
            "out buffer of {} bytes, need {need_out}",
            p.out.len()
        )));
    }
    Ok(())
}

/// K==0 with accumulation unset: the result of an empty reduction is zero,
/// written over the full strided output region.
fn zero_out(p: &mut Mmt4dParams<'_>) {
    let out_log2 = p.kind.out_type().size_log2();
    let row_bytes = (p.n * p.m0 * p.n0) << out_log2;
    let stride_bytes = p.out_stride << out_log2;
    for i in 0..p.m {
        let start = i * stride_bytes;
        p.out[start..start + row_bytes].fill(0);
    }
}

/// Degenerate-shape short-circuits, run before tile selection. Returns true
/// when the call is already complete. This is the documented early-exit
/// policy, not a fallback through the general loop.
fn early(p: &mut Mmt4dParams<'_>) -> bool {
    if p.m == 0 || p.n == 0 {
        return true;
    }
    if p.k == 0 {
        if p.flags & FLAG_ACCUMULATE == 0 {
            zero_out(p);
        }
        return true;
    }
    false
}

struct LoopCtx {
    n: usize,
    k: usize,
    flags: u32,
    geom: TileGeometry,
    out_tile_bytes: usize,
    rhs_panel_bytes: usize,
    lhs_row_bytes: usize,
}

fn run_row(ctx: &LoopCtx, tile_fn: Mmt4dTileFn, out_row: &mut [u8], lhs_row: &[u8], rhs: &[u8]) {
    let mut out_tile = out_row.as_mut_ptr();
    let mut rhs_panel = rhs.as_ptr();
    for _ in 0..ctx.n {
        // SAFETY: validation bounded every panel and tile against its
        // buffer; pointers stay inside their slices by construction.
        unsafe {
            tile_fn(out_tile, lhs_row.as_ptr(), rhs_panel, ctx.k, ctx.flags, &ctx.geom);
            out_tile = out_tile.add(ctx.out_tile_bytes);
            rhs_panel = rhs_panel.add(ctx.rhs_panel_bytes);
        }
    }
}

/// Tiled matmul-accumulate. Validates, short-circuits degenerate shapes,
/// selects one tile routine, and drives the shared outer loops.
pub fn mmt4d(mut params: Mmt4dParams<'_>, registry: &TileRegistry) -> Result<()> {
    validate(&params)?;
    if early(&mut params) {
        return Ok(());
    }

    let tile_fn = registry.select_mmt4d(params.kind, params.m0, params.n0, params.k0);

    let lhs_log2 = params.kind.lhs_type().size_log2();
    let rhs_log2 = params.kind.rhs_type().size_log2();
    let out_log2 = params.kind.out_type().size_log2();
    let ctx = LoopCtx {
        n: params.n,
        k: params.k,
        flags: params.flags,
        geom: TileGeometry {
            m0: params.m0,
            n0: params.n0,
            k0: params.k0,
        },
        out_tile_bytes: (params.m0 * params.n0) << out_log2,
        rhs_panel_bytes: params.rhs_stride << rhs_log2,
        lhs_row_bytes: params.lhs_stride << lhs_log2,
    };
    let out_row_bytes = params.out_stride << out_log2;

    // Split the output into one disjoint slice per tile row; the same row
    // list drives the serial and the parallel path.
    let m = params.m;
    let mut rows: Vec<&mut [u8]> = Vec::with_capacity(m);
    let mut rest = std::mem::take(&mut params.out);
    for _ in 0..m - 1 {
        let (row, tail) = rest.split_at_mut(out_row_bytes);
        rows.push(row);
        rest = tail;
    }
    rows.push(rest);

    let lhs = params.lhs;
    let rhs = params.rhs;
    if m >= PARALLEL_MIN_ROWS {
        use rayon::prelude::*;
        rows.into_par_iter().enumerate().for_each(|(i, row)| {
            run_row(&ctx, tile_fn, row, &lhs[i * ctx.lhs_row_bytes..], rhs);
        });
    } else {
        for (i, row) in rows.into_iter().enumerate() {
            run_row(&ctx, tile_fn, row, &lhs[i * ctx.lhs_row_bytes..], rhs);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_params<'a>(
        m: usize,
        n: usize,
        k: usize,
        lhs: &'a [u8],
        rhs: &'a [u8],
        out: &'a mut [u8],
    ) -> Mmt4dParams<'a> {
        Mmt4dParams {
            kind: Mmt4dKind::F32F32F32,
            flags: 0,
            m,
            n,
            k,
            m0: 2,
            n0: 2,
            k0: 1,
            lhs,
            lhs_stride: k * 2,
            rhs,
            rhs_stride: k * 2,
            out,
            out_stride: n * 4,
        }
    }

    #[test]
    fn undefined_flags_rejected() {
        let lhs = [0u8; 16];
        let rhs = [0u8; 16];
        let mut out = [0u8; 32];
        let mut p = f32_params(1, 1, 1, &lhs, &rhs, &mut out);
        p.flags = 0x80;
        assert!(matches!(
            mmt4d(p, TileRegistry::generic()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn oversized_tile_rejected() {
        let lhs = [0u8; 4];
        let rhs = [0u8; 4];
        let mut out = [0u8; 4];
        let p = Mmt4dParams {
            kind: Mmt4dKind::F32F32F32,
            flags: 0,
            m: 1,
            n: 1,
            k: 1,
            m0: 64,
            n0: 64,
            k0: 1,
            lhs: &lhs,
            lhs_stride: 64,
            rhs: &rhs,
            rhs_stride: 64,
            out: &mut out,
            out_stride: 4096,
        };
        assert!(matches!(
            mmt4d(p, TileRegistry::generic()),
            Err(Error::ResourceExhausted(_))
        ));
    }

    #[test]
    fn short_output_buffer_rejected() {
        let lhs = [0u8; 16];
        let rhs = [0u8; 16];
        let mut out = [0u8; 8];
        let p = f32_params(1, 1, 2, &lhs, &rhs, &mut out);
        assert!(matches!(
            mmt4d(p, TileRegistry::generic()),
            Err(Error::InvalidArgument(_))
        ));
    }
}
