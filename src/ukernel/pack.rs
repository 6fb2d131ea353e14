//! Pack/pad: reshape a strided 2-D buffer into a 4-D tiled, padded layout.
//!
//! Output layout is `[out_size0][out_size1][out_size2][out_size3]` with
//! `out_stride0` elements between dim-0 slices. Transpose flags swap the
//! outer or inner dimension pairs once, before the loop; no loop logic is
//! duplicated per flag combination.
//!
//! Padding is decoupled from packing: a fixed-size call-local scratch buffer
//! materializes one padded row chunk of tiles at a time and hands it to the
//! same tile routine used for the interior. Fully-interior tiles bypass the
//! scratch entirely.

use crate::error::{Error, Result};
use crate::ukernel::tile::{PackTileFn, TileRegistry};
use crate::ukernel::{
    div_by_tile, ElemType, FLAG_TRANSPOSE_INNER, FLAG_TRANSPOSE_OUTER, MAX_OUTER_DIM, MAX_TILE_DIM,
};

/// Size of the call-local padding scratch. One tile must fit; whole tiles
/// are batched into it per chunk.
pub const PACK_SCRATCH_BYTES: usize = 4096;

/// Element-kind combinations supported by pack/unpack (input and output
/// element types are always the same).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackKind {
    F32F32,
    I8I8,
    I32I32,
}

impl PackKind {
    pub const fn elem(self) -> ElemType {
        match self {
            Self::F32F32 => ElemType::F32,
            Self::I8I8 => ElemType::I8,
            Self::I32I32 => ElemType::I32,
        }
    }
}

/// Flat per-call descriptor. Strides are in elements.
pub struct PackParams<'a> {
    pub kind: PackKind,
    /// [`FLAG_TRANSPOSE_INNER`] and/or [`FLAG_TRANSPOSE_OUTER`].
    pub flags: u32,
    pub in_size0: usize,
    pub in_size1: usize,
    /// Elements between consecutive input rows.
    pub in_stride0: usize,
    pub out_size0: usize,
    pub out_size1: usize,
    pub out_size2: usize,
    pub out_size3: usize,
    /// Elements between consecutive output dim-0 slices.
    pub out_stride0: usize,
    pub input: &'a [u8],
    pub out: &'a mut [u8],
    /// One element's worth of padding bytes.
    pub padding_value: &'a [u8],
}

/// Fills `buf` with `num_elems` repetitions of `pattern` (`elem_size`
/// bytes). When the pattern's bytes are all equal it is legal to pass
/// `is_single_byte=true`, which takes the memset fast path; both paths
/// produce identical bytes.
pub fn fill(buf: &mut [u8], num_elems: usize, elem_size: usize, is_single_byte: bool, pattern: &[u8]) {
    if is_single_byte {
        buf[..num_elems * elem_size].fill(pattern[0]);
    } else {
        for i in 0..num_elems {
            buf[i * elem_size..(i + 1) * elem_size].copy_from_slice(&pattern[..elem_size]);
        }
    }
}

/// Whether all of `bytes` are the same value (enables the memset path).
pub fn is_single_byte_pattern(bytes: &[u8]) -> bool {
    bytes.windows(2).all(|w| w[0] == w[1])
}

#[repr(align(64))]
struct Scratch([u8; PACK_SCRATCH_BYTES]);

/// Call-local padding scratch plus the facts derived from it once.
struct ScratchHelper {
    buf: Scratch,
    max_tiles: usize,
    padding_single_byte: bool,
}

impl ScratchHelper {
    fn new(tile0: usize, tile1: usize, elem_size: usize, padding: &[u8]) -> Self {
        Self {
            buf: Scratch([0u8; PACK_SCRATCH_BYTES]),
            max_tiles: div_by_tile(PACK_SCRATCH_BYTES, tile0 * tile1 * elem_size),
            padding_single_byte: is_single_byte_pattern(padding),
        }
    }
}

/// Loop-invariant facts, computed once after the transpose swaps.
struct PackCtx<'a> {
    tile_fn: PackTileFn,
    elem_size: usize,
    tile_size0: usize,
    tile_size1: usize,
    outer_size1: usize,
    /// Elements between consecutive tiles along the traversal dim 1.
    out_stride1: usize,
    l2: usize,
    l3: usize,
    in_size1: usize,
    in_stride0: usize,
    padding: &'a [u8],
}

fn validate(p: &PackParams<'_>) -> Result<()> {
    let allowed = FLAG_TRANSPOSE_INNER | FLAG_TRANSPOSE_OUTER;
    if p.flags & !allowed != 0 {
        return Err(Error::InvalidArgument(format!(
            "undefined pack flag bits {:#x}",
            p.flags & !allowed
        )));
    }
    let elem_size = p.kind.elem().size();
    if p.padding_value.len() != elem_size {
        return Err(Error::InvalidArgument(format!(
            "padding value of {} bytes for {elem_size}-byte elements",
            p.padding_value.len()
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
    for (name, dim) in [("out_size2", p.out_size2), ("out_size3", p.out_size3)] {
        if dim > MAX_TILE_DIM {
            return Err(Error::InvalidArgument(format!(
                "{name}={dim} outside the 15-bit tile dimension range"
            )));
        }
    }

    let mut outer_size0 = p.out_size0;
    let mut outer_size1 = p.out_size1;
    let mut tile_size0 = p.out_size2;
    let mut tile_size1 = p.out_size3;
    if p.flags & FLAG_TRANSPOSE_OUTER != 0 {
        std::mem::swap(&mut outer_size0, &mut outer_size1);
    }
    if p.flags & FLAG_TRANSPOSE_INNER != 0 {
        std::mem::swap(&mut tile_size0, &mut tile_size1);
    }

    if tile_size0 > 0 && tile_size1 > 0 {
        let tile_bytes = tile_size0 * tile_size1 * elem_size;
        if tile_bytes > PACK_SCRATCH_BYTES {
            return Err(Error::ResourceExhausted(format!(
                "tile of {tile_bytes} bytes exceeds the {PACK_SCRATCH_BYTES} byte padding scratch"
            )));
        }
    }

    // Declared output must cover the input up to tile granularity. The
    // stricter upper bound ((outer-1)*tile < in_size, i.e. no fully padded
    // trailing tiles) is intentionally not enforced: producers are known to
    // emit such shapes, so only coverage is required here.
    let cover0 = outer_size0
        .checked_mul(tile_size0)
        .ok_or_else(|| Error::InvalidArgument("output extent overflow".into()))?;
    let cover1 = outer_size1
        .checked_mul(tile_size1)
        .ok_or_else(|| Error::InvalidArgument("output extent overflow".into()))?;
    if cover0 < p.in_size0 || cover1 < p.in_size1 {
        return Err(Error::InvalidArgument(format!(
            "output of {cover0}x{cover1} (tile-granular) does not cover input of {}x{}",
            p.in_size0, p.in_size1
        )));
    }

    let log2 = p.kind.elem().size_log2();
    if p.in_size0 > 0 && p.in_size1 > 0 {
        let need = ((p.in_size0 - 1)
            .checked_mul(p.in_stride0)
            .and_then(|v| v.checked_add(p.in_size1))
            .ok_or_else(|| Error::InvalidArgument("input extent overflow".into()))?)
            << log2;
        if p.input.len() < need {
            return Err(Error::InvalidArgument(format!(
                "input buffer of {} bytes, need {need}",
                p.input.len()
            )));
        }
    }
    if p.out_size0 > 0 && p.out_size1 > 0 && p.out_size2 > 0 && p.out_size3 > 0 {
        let row = p.out_size1 * p.out_size2 * p.out_size3;
        let need = ((p.out_size0 - 1)
            .checked_mul(p.out_stride0)
            .and_then(|v| v.checked_add(row))
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

/// Fills the scratch's used region with padding, then copies the valid
/// source sub-region over it.
///
/// # Safety
///
/// When `src_size0 > 0 && src_size1 > 0`, `src_base` plus the row offsets
/// must be readable for the copied region. The scratch bounds are enforced
/// by `max_tiles`.
unsafe fn copy_and_pad(
    ctx: &PackCtx<'_>,
    helper: &mut ScratchHelper,
    src_base: *const u8,
    src_row_elems: usize,
    src_size0: usize,
    src_size1: usize,
    dst_size0: usize,
    dst_size1: usize,
    dst_stride0: usize,
) {
    let e = ctx.elem_size;
    let used_elems = dst_size1 + (dst_size0 - 1) * dst_stride0;
    fill(
        &mut helper.buf.0,
        used_elems,
        e,
        helper.padding_single_byte,
        ctx.padding,
    );
    if src_size1 == 0 {
        return;
    }
    for r in 0..src_size0 {
        std::ptr::copy_nonoverlapping(
            src_base.add((src_row_elems + r * ctx.in_stride0) * e),
            helper.buf.0.as_mut_ptr().add(r * dst_stride0 * e),
            src_size1 * e,
        );
    }
}

/// Pads and packs the tiles `[dim1_tile_start, dim1_tile_end)` of one output
/// row through the scratch buffer. Interior tiles that need no padding are
/// handled by the caller's fast path, not here.
///
/// # Safety
///
/// `out_row` must cover the addressed tiles and, when `dim0_read > 0`, the
/// input row at `in_row0_elems` must exist.
#[allow(clippy::too_many_arguments)]
unsafe fn pad_and_pack_row(
    ctx: &PackCtx<'_>,
    helper: &mut ScratchHelper,
    dim1_tile_start: usize,
    dim1_tile_end: usize,
    dim0_read: usize,
    in_base: *const u8,
    in_row0_elems: usize,
    out_row: *mut u8,
) {
    let e = ctx.elem_size;
    let mut dim1_tile = dim1_tile_start;
    while dim1_tile < dim1_tile_end {
        let chunk_tiles = (dim1_tile_end - dim1_tile).min(helper.max_tiles);
        let chunk_src_width = chunk_tiles * ctx.tile_size1;
        let chunk_src_pos = dim1_tile * ctx.tile_size1;
        let read1 = ctx
            .in_size1
            .saturating_sub(chunk_src_pos)
            .min(chunk_src_width);
        copy_and_pad(
            ctx,
            helper,
            in_base,
            in_row0_elems + chunk_src_pos,
            dim0_read,
            read1,
            ctx.tile_size0,
            chunk_src_width,
            chunk_src_width,
        );
        (ctx.tile_fn)(
            out_row.add(dim1_tile * ctx.out_stride1 * e),
            helper.buf.0.as_ptr(),
            chunk_tiles,
            ctx.out_stride1,
            chunk_src_width,
            e,
            ctx.tile_size0,
            ctx.tile_size1,
            ctx.l2,
            ctx.l3,
        );
        dim1_tile += chunk_tiles;
    }
}

/// Packs a 2-D buffer into the 4-D tiled, padded layout.
pub fn pack(mut params: PackParams<'_>, registry: &TileRegistry) -> Result<()> {
    validate(&params)?;
    if params.out_size0 == 0
        || params.out_size1 == 0
        || params.out_size2 == 0
        || params.out_size3 == 0
    {
        return Ok(());
    }

    let e = params.kind.elem().size();
    let tile_fn = registry.select_pack(e);

    let mut outer_size0 = params.out_size0;
    let mut outer_size1 = params.out_size1;
    let mut tile_size0 = params.out_size2;
    let mut tile_size1 = params.out_size3;
    let mut out_stride_l0 = params.out_stride0;
    let mut out_stride1 = params.out_size2 * params.out_size3;
    let mut l2 = params.out_size3;
    let mut l3 = 1usize;
    if params.flags & FLAG_TRANSPOSE_OUTER != 0 {
        std::mem::swap(&mut outer_size0, &mut outer_size1);
        std::mem::swap(&mut out_stride_l0, &mut out_stride1);
    }
    if params.flags & FLAG_TRANSPOSE_INNER != 0 {
        std::mem::swap(&mut tile_size0, &mut tile_size1);
        std::mem::swap(&mut l2, &mut l3);
    }

    let ctx = PackCtx {
        tile_fn,
        elem_size: e,
        tile_size0,
        tile_size1,
        outer_size1,
        out_stride1,
        l2,
        l3,
        in_size1: params.in_size1,
        in_stride0: params.in_stride0,
        padding: params.padding_value,
    };
    let mut helper = ScratchHelper::new(tile_size0, tile_size1, e, params.padding_value);

    // Tiles along dim 1 that sit entirely inside the source (no padding).
    let dim1_full_tiles = div_by_tile(params.in_size1, tile_size1);

    let in_ptr = params.input.as_ptr();
    let out_ptr = params.out.as_mut_ptr();
    let outer1 = ctx.outer_size1;
    for r in 0..outer_size0 {
        let i0 = r * tile_size0;
        // SAFETY: r < outer_size0 keeps the row origin inside the validated
        // output extent.
        let out_row = unsafe { out_ptr.add(r * out_stride_l0 * e) };
        if i0 + tile_size0 <= params.in_size0 {
            // Full-height row: interior tiles pack straight from the source,
            // only the right edge goes through the scratch.
            // SAFETY: rows i0..i0+tile_size0 and the first
            // dim1_full_tiles*tile_size1 columns all exist in the input.
            unsafe {
                (ctx.tile_fn)(
                    out_row,
                    in_ptr.add(i0 * ctx.in_stride0 * e),
                    dim1_full_tiles,
                    ctx.out_stride1,
                    ctx.in_stride0,
                    e,
                    ctx.tile_size0,
                    ctx.tile_size1,
                    ctx.l2,
                    ctx.l3,
                );
                pad_and_pack_row(
                    &ctx,
                    &mut helper,
                    dim1_full_tiles,
                    outer1,
                    tile_size0,
                    in_ptr,
                    i0 * ctx.in_stride0,
                    out_row,
                );
            }
        } else {
            // Bottom padding: the row is at most partially backed by source.
            let dim0_read = params.in_size0.saturating_sub(i0).min(tile_size0);
            // SAFETY: dim0_read > 0 implies row i0 exists.
            unsafe {
                pad_and_pack_row(
                    &ctx,
                    &mut helper,
                    0,
                    outer1,
                    dim0_read,
                    in_ptr,
                    i0 * ctx.in_stride0,
                    out_row,
                );
            }
        }
    }
    Ok(())
}
