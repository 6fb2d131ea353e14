//! Shared test helpers: an image writer mirroring what the compiler emits.
#![allow(dead_code)]

use mlc_exec::image::{Architecture, IMAGE_MAGIC, IMAGE_VERSION, MODE_GRAPH, MODE_STREAM};

pub const KIND_ABS32: u16 = 1;
pub const KIND_ABS64: u16 = 2;
pub const KIND_REL32: u16 = 3;
pub const KIND_HI20: u16 = 4;
pub const KIND_LO12I: u16 = 5;

pub const SYM_INTERNAL: u16 = 0;
pub const SYM_EXTERNAL: u16 = 1;

/// Generous segment spacing that is page-aligned on any realistic host.
pub const SEG_ALIGN: u32 = 0x10000;

pub struct SegmentSpec {
    pub vaddr: u32,
    pub mem_size: u32,
    pub data: Vec<u8>,
    pub perms: u32,
}

pub struct RawReloc {
    pub segment: u16,
    pub kind: u16,
    pub offset: u32,
    pub sym_kind: u16,
    pub sym_index: u16,
    pub sym_offset: u32,
    pub addend: i64,
}

pub struct ImageBuilder {
    arch_tag: u16,
    modes: u16,
    segments: Vec<SegmentSpec>,
    entries: Vec<(String, u32)>,
    relocs: Vec<RawReloc>,
    names: Vec<String>,
}

impl ImageBuilder {
    pub fn new(arch: Architecture) -> Self {
        Self {
            arch_tag: arch.tag(),
            modes: MODE_GRAPH | MODE_STREAM,
            segments: Vec::new(),
            entries: Vec::new(),
            relocs: Vec::new(),
            names: Vec::new(),
        }
    }

    pub fn host() -> Self {
        Self::new(Architecture::host().expect("unsupported test host"))
    }

    pub fn arch_tag(mut self, tag: u16) -> Self {
        self.arch_tag = tag;
        self
    }

    pub fn modes(mut self, modes: u16) -> Self {
        self.modes = modes;
        self
    }

    pub fn segment(mut self, vaddr: u32, data: &[u8], mem_size: u32, perms: u32) -> Self {
        self.segments.push(SegmentSpec {
            vaddr,
            mem_size,
            data: data.to_vec(),
            perms,
        });
        self
    }

    pub fn entry(mut self, name: &str, vaddr: u32) -> Self {
        self.entries.push((name.to_string(), vaddr));
        self
    }

    pub fn reloc(mut self, reloc: RawReloc) -> Self {
        self.relocs.push(reloc);
        self
    }

    pub fn symbol_name(mut self, name: &str) -> Self {
        self.names.push(name.to_string());
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut tables = Vec::new();
        let mut payload = Vec::new();
        for seg in &self.segments {
            let file_offset = payload.len() as u32;
            payload.extend_from_slice(&seg.data);
            tables.extend_from_slice(&seg.vaddr.to_le_bytes());
            tables.extend_from_slice(&seg.mem_size.to_le_bytes());
            tables.extend_from_slice(&file_offset.to_le_bytes());
            tables.extend_from_slice(&(seg.data.len() as u32).to_le_bytes());
            tables.extend_from_slice(&seg.perms.to_le_bytes());
        }
        for (name, vaddr) in &self.entries {
            tables.extend_from_slice(&vaddr.to_le_bytes());
            tables.extend_from_slice(&(name.len() as u16).to_le_bytes());
            tables.extend_from_slice(name.as_bytes());
        }
        for r in &self.relocs {
            tables.extend_from_slice(&r.segment.to_le_bytes());
            tables.extend_from_slice(&r.kind.to_le_bytes());
            tables.extend_from_slice(&r.offset.to_le_bytes());
            tables.extend_from_slice(&r.sym_kind.to_le_bytes());
            tables.extend_from_slice(&r.sym_index.to_le_bytes());
            tables.extend_from_slice(&r.sym_offset.to_le_bytes());
            tables.extend_from_slice(&r.addend.to_le_bytes());
        }
        for name in &self.names {
            tables.extend_from_slice(&(name.len() as u16).to_le_bytes());
            tables.extend_from_slice(name.as_bytes());
        }

        let payload_offset = 28 + tables.len() as u32;
        let mut image = Vec::new();
        image.extend_from_slice(&IMAGE_MAGIC);
        image.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
        image.extend_from_slice(&self.arch_tag.to_le_bytes());
        image.extend_from_slice(&self.modes.to_le_bytes());
        image.extend_from_slice(&(self.segments.len() as u16).to_le_bytes());
        image.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        image.extend_from_slice(&(self.relocs.len() as u16).to_le_bytes());
        image.extend_from_slice(&(self.names.len() as u16).to_le_bytes());
        image.extend_from_slice(&0u16.to_le_bytes());
        image.extend_from_slice(&payload_offset.to_le_bytes());
        image.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        image.extend_from_slice(&tables);
        image.extend_from_slice(&payload);
        image
    }
}

/// Machine code for `fn(args: *const u8, len: usize) -> i32` returning
/// `status`, for the architectures tests run on natively.
#[cfg(target_arch = "x86_64")]
pub fn return_status_code(status: i32) -> Vec<u8> {
    let mut code = vec![0xB8]; // mov eax, imm32
    code.extend_from_slice(&status.to_le_bytes());
    code.push(0xC3); // ret
    code
}

#[cfg(target_arch = "aarch64")]
pub fn return_status_code(status: i32) -> Vec<u8> {
    assert!((0..=u16::MAX as i32).contains(&status));
    // movz w0, #status ; ret
    let movz = 0x5280_0000u32 | ((status as u32) << 5);
    let mut code = movz.to_le_bytes().to_vec();
    code.extend_from_slice(&0xD65F_03C0u32.to_le_bytes());
    code
}
