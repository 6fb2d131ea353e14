//! Freestanding loader for compiler-produced relocatable images.
//!
//! Loads a position-independent image into the current process without
//! `dlopen`/`ld.so`: validate, map one anonymous span, copy segment bytes,
//! apply relocations, then finalize page permissions. Every failure path
//! drops the single mapping, so a failed load leaves nothing mapped.
//!
//! Loading is not reentrant on the same target object; concurrent *use* of a
//! finished [`LoadedExecutable`] is safe.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::image::{Architecture, Image, MODE_GRAPH, MODE_STREAM};

pub mod library;
mod mapping;
mod reloc;

pub use library::{DispatchFn, EntryPoint, ExecutableLibrary};
pub use mapping::Mapping;

use crate::config::CommandBufferMode;

/// Caller-provided addresses for external symbols (math intrinsics and the
/// like), consulted only during relocation.
#[derive(Debug, Default)]
pub struct ExternalSymbols {
    map: HashMap<String, usize>,
}

impl ExternalSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, addr: usize) {
        self.map.insert(name.into(), addr);
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.map.get(name).copied()
    }
}

/// Knobs bounding a single load.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Ceiling on the total mapped span. A corrupt segment table cannot make
    /// the loader map more than this.
    pub max_image_size: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            max_image_size: 64 * 1024 * 1024,
        }
    }
}

/// A fully loaded, relocated, permission-finalized image.
///
/// Owns its mapping exclusively; dropping unmaps everything. Move-only by
/// construction (no `Clone`).
#[derive(Debug)]
pub struct LoadedExecutable {
    mapping: Mapping,
    arch: Architecture,
    modes: u16,
    /// name -> absolute address, in image table order (ordinal = index).
    entry_points: Vec<(String, usize)>,
    segments: Vec<crate::image::Segment>,
}

impl LoadedExecutable {
    pub fn arch(&self) -> Architecture {
        self.arch
    }

    pub fn entry_count(&self) -> usize {
        self.entry_points.len()
    }

    /// Whether the compiler tagged this executable as dispatchable from
    /// command buffers of `mode`.
    pub fn supports_mode(&self, mode: CommandBufferMode) -> bool {
        match mode {
            CommandBufferMode::Graph => self.modes & MODE_GRAPH != 0,
            CommandBufferMode::Stream => self.modes & MODE_STREAM != 0,
        }
    }

    pub(crate) fn entry_points(&self) -> &[(String, usize)] {
        &self.entry_points
    }

    /// Read-only view of a loaded segment's bytes, for inspection tooling.
    pub fn segment_data(&self, index: usize) -> Result<&[u8]> {
        let seg = self.segments.get(index).ok_or_else(|| {
            Error::NotFound(format!("segment {index} of {}", self.segments.len()))
        })?;
        self.mapping.slice(seg.vaddr as usize, seg.mem_size as usize)
    }
}

/// Loads `bytes` as a relocatable image.
///
/// Validation is fail-fast: the header, tables, and size ceiling are checked
/// before any memory is mapped, and relocation symbols resolve before any
/// patch is written. On error nothing remains mapped.
pub fn load(
    bytes: &[u8],
    symbols: &ExternalSymbols,
    options: &LoadOptions,
) -> Result<LoadedExecutable> {
    let image = Image::parse(bytes)?;

    let host = Architecture::host().ok_or_else(|| {
        Error::UnsupportedArchitecture("runtime compiled for an unsupported host".into())
    })?;
    if image.arch != host {
        return Err(Error::UnsupportedArchitecture(format!(
            "image targets {:?}, runtime is {:?}",
            image.arch, host
        )));
    }

    // Per-segment permissions are applied at page granularity, so segments
    // must start on page boundaries and may not share a page.
    let page = mapping::page_size();
    let mut span: u64 = 0;
    let mut prev_end: u64 = 0;
    let mut order: Vec<usize> = (0..image.segments.len()).collect();
    order.sort_by_key(|&i| image.segments[i].vaddr);
    for &i in &order {
        let seg = &image.segments[i];
        if seg.vaddr as usize % page != 0 {
            return Err(Error::InvalidFormat(format!(
                "segment {i} vaddr {:#x} is not page-aligned ({page} bytes)",
                seg.vaddr
            )));
        }
        let end = seg.vaddr as u64 + mapping::round_up_to_page(seg.mem_size as usize) as u64;
        if (seg.vaddr as u64) < prev_end {
            return Err(Error::InvalidFormat(format!(
                "segment {i} shares a page with its predecessor"
            )));
        }
        prev_end = end;
        span = span.max(end);
    }

    if span > options.max_image_size as u64 {
        return Err(Error::ResourceExhausted(format!(
            "mapped span of {span} bytes exceeds the {} byte ceiling",
            options.max_image_size
        )));
    }
    let span = span as usize;

    if image.segments.is_empty() {
        return Err(Error::InvalidFormat("image has no segments".into()));
    }

    let mut map = Mapping::new(span)?;
    {
        let dst = map.as_mut_slice()?;
        for seg in &image.segments {
            let file_offset = seg.file_offset as usize;
            let src = &image.payload[file_offset..file_offset + seg.file_size as usize];
            dst[seg.vaddr as usize..seg.vaddr as usize + seg.file_size as usize]
                .copy_from_slice(src);
            // mem_size beyond file_size stays zero (anonymous pages).
        }
    }

    reloc::apply_relocations(&image, symbols, &mut map)?;
    map.finalize(&image.segments)?;

    let base = map.base() as usize;
    let entry_points = image
        .entry_points
        .iter()
        .map(|e| (e.name.clone(), base + e.vaddr as usize))
        .collect();

    log::debug!(
        "loaded {:?} image: {} segments, {} entry points, {} relocations, {span} bytes mapped",
        image.arch,
        image.segments.len(),
        image.entry_points.len(),
        image.relocations.len(),
    );

    Ok(LoadedExecutable {
        mapping: map,
        arch: image.arch,
        modes: image.modes,
        entry_points,
        segments: image.segments,
    })
}
