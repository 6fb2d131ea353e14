//! Relocatable image format produced by the compiler.
//!
//! An image is a single immutable byte buffer: a fixed header, then segment /
//! entry-point / relocation / symbol-name tables, then the raw segment
//! payload. All multi-byte fields are little-endian. Parsing validates every
//! table bound against the buffer length before anything else looks at the
//! bytes, so the loader can treat a parsed [`Image`] as structurally sound.
//!
//! The format intentionally has none of the machinery of a general dynamic
//! linker: no lazy binding, no search paths, no symbol versioning. External
//! references resolve against a caller-supplied symbol table at load time or
//! not at all.

use crate::error::{Error, Result};

/// Magic bytes at offset 0 of every image.
pub const IMAGE_MAGIC: [u8; 4] = *b"AOTX";

/// Current format version.
pub const IMAGE_VERSION: u16 = 1;

/// Command-buffer mode bits carried in the image header: the compiler tags
/// each executable with the recording modes its dispatches support.
pub const MODE_GRAPH: u16 = 1 << 0;
pub const MODE_STREAM: u16 = 1 << 1;

/// Segment permission bits.
pub mod perms {
    pub const READ: u32 = 1 << 0;
    pub const WRITE: u32 = 1 << 1;
    pub const EXEC: u32 = 1 << 2;
}

/// Instruction-set architectures an image can target. Closed set: the loader
/// refuses tags it does not know rather than guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    X86_64,
    Arm32,
    Aarch64,
    Riscv32,
    Riscv64,
}

impl Architecture {
    pub const fn tag(self) -> u16 {
        match self {
            Self::X86_64 => 1,
            Self::Arm32 => 2,
            Self::Aarch64 => 3,
            Self::Riscv32 => 4,
            Self::Riscv64 => 5,
        }
    }

    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            1 => Some(Self::X86_64),
            2 => Some(Self::Arm32),
            3 => Some(Self::Aarch64),
            4 => Some(Self::Riscv32),
            5 => Some(Self::Riscv64),
            _ => None,
        }
    }

    /// The architecture this runtime was compiled for, if supported.
    pub fn host() -> Option<Self> {
        if cfg!(target_arch = "x86_64") {
            Some(Self::X86_64)
        } else if cfg!(target_arch = "arm") {
            Some(Self::Arm32)
        } else if cfg!(target_arch = "aarch64") {
            Some(Self::Aarch64)
        } else if cfg!(target_arch = "riscv32") {
            Some(Self::Riscv32)
        } else if cfg!(target_arch = "riscv64") {
            Some(Self::Riscv64)
        } else {
            None
        }
    }

    pub const fn pointer_width(self) -> usize {
        match self {
            Self::X86_64 | Self::Aarch64 | Self::Riscv64 => 8,
            Self::Arm32 | Self::Riscv32 => 4,
        }
    }
}

/// One loadable segment. `vaddr`/`mem_size` describe the placement inside the
/// mapped span; `file_offset`/`file_size` the source range inside the image
/// payload. Bytes beyond `file_size` up to `mem_size` are zero-initialized.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub vaddr: u32,
    pub mem_size: u32,
    pub file_offset: u32,
    pub file_size: u32,
    pub perms: u32,
}

impl Segment {
    pub fn is_exec(&self) -> bool {
        self.perms & perms::EXEC != 0
    }

    pub fn is_write(&self) -> bool {
        self.perms & perms::WRITE != 0
    }
}

/// An exported dispatch function: name plus its vaddr inside the image.
#[derive(Debug, Clone)]
pub struct EntryPointDef {
    pub name: String,
    pub vaddr: u32,
}

/// What a relocation resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolRef {
    /// A location inside the image itself.
    Internal { segment: u16, offset: u32 },
    /// An index into the image's symbol-name table, resolved against the
    /// caller-supplied external symbol table at load time.
    External { name: u16 },
}

/// Relocation encodings. `Hi20`/`Lo12I` are the RISC-V split absolute pair;
/// the other kinds are shared across architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// 32-bit absolute: S + A, must fit u32.
    Abs32,
    /// 64-bit absolute: S + A. 64-bit targets only.
    Abs64,
    /// 32-bit PC-relative: S + A - P, must fit i32.
    Rel32,
    /// Upper 20 bits of S + A into a RISC-V LUI/AUIPC imm field.
    Hi20,
    /// Low 12 bits of S + A into the paired RISC-V I-type imm field.
    Lo12I,
}

impl RelocKind {
    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            1 => Some(Self::Abs32),
            2 => Some(Self::Abs64),
            3 => Some(Self::Rel32),
            4 => Some(Self::Hi20),
            5 => Some(Self::Lo12I),
            _ => None,
        }
    }

    /// Bytes written at the target location.
    pub const fn patch_size(self) -> u32 {
        match self {
            Self::Abs64 => 8,
            Self::Abs32 | Self::Rel32 | Self::Hi20 | Self::Lo12I => 4,
        }
    }
}

/// One relocation table entry, applied in table order at load time.
#[derive(Debug, Clone, Copy)]
pub struct Relocation {
    pub segment: u16,
    pub offset: u32,
    pub kind: RelocKind,
    pub symbol: SymbolRef,
    pub addend: i64,
}

/// A parsed, structurally validated image. Borrows the payload from the
/// input buffer; nothing is mapped yet.
#[derive(Debug)]
pub struct Image<'a> {
    pub arch: Architecture,
    pub modes: u16,
    pub segments: Vec<Segment>,
    pub entry_points: Vec<EntryPointDef>,
    pub relocations: Vec<Relocation>,
    pub symbol_names: Vec<String>,
    pub payload: &'a [u8],
}

/// Little-endian table reader. Every accessor fails with `InvalidFormat`
/// instead of panicking when the buffer is short.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| Error::InvalidFormat(format!("truncated image reading {what}")))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        let b = self.bytes(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        let b = self.bytes(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self, what: &str) -> Result<i64> {
        let b = self.bytes(8, what)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_le_bytes(raw))
    }

    fn string(&mut self, what: &str) -> Result<String> {
        let len = self.u16(what)? as usize;
        let bytes = self.bytes(len, what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::InvalidFormat(format!("non-utf8 {what}")))
    }
}

impl<'a> Image<'a> {
    /// Parses and validates an image buffer. No memory is mapped and nothing
    /// is interpreted past the first failing check.
    pub fn parse(bytes: &'a [u8]) -> Result<Image<'a>> {
        let mut c = Cursor::new(bytes);

        let magic = c.bytes(4, "magic")?;
        if magic != IMAGE_MAGIC {
            return Err(Error::InvalidFormat(format!(
                "bad magic {magic:02x?}, expected {IMAGE_MAGIC:02x?}"
            )));
        }
        let version = c.u16("version")?;
        if version != IMAGE_VERSION {
            return Err(Error::InvalidFormat(format!(
                "unsupported format version {version}"
            )));
        }
        // The architecture tag gates everything after it: no other byte of
        // the image is interpreted before this check passes.
        let arch_tag = c.u16("architecture tag")?;
        let arch = Architecture::from_tag(arch_tag).ok_or_else(|| {
            Error::UnsupportedArchitecture(format!("unknown architecture tag {arch_tag}"))
        })?;
        let modes = c.u16("modes")?;
        if modes & !(MODE_GRAPH | MODE_STREAM) != 0 {
            return Err(Error::InvalidFormat(format!(
                "undefined command-buffer mode bits {modes:#06x}"
            )));
        }
        let segment_count = c.u16("segment count")? as usize;
        let entry_count = c.u16("entry count")? as usize;
        let reloc_count = c.u16("relocation count")? as usize;
        let name_count = c.u16("symbol name count")? as usize;
        let reserved = c.u16("reserved")?;
        if reserved != 0 {
            return Err(Error::InvalidFormat("reserved field must be zero".into()));
        }
        let payload_offset = c.u32("payload offset")? as usize;
        let payload_size = c.u32("payload size")? as usize;
        let payload_end = payload_offset
            .checked_add(payload_size)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| {
                Error::InvalidFormat(format!(
                    "payload range {payload_offset}+{payload_size} exceeds image of {} bytes",
                    bytes.len()
                ))
            })?;
        let payload = &bytes[payload_offset..payload_end];

        let mut segments = Vec::with_capacity(segment_count);
        for i in 0..segment_count {
            let vaddr = c.u32("segment vaddr")?;
            let mem_size = c.u32("segment mem size")?;
            let file_offset = c.u32("segment file offset")?;
            let file_size = c.u32("segment file size")?;
            let seg_perms = c.u32("segment perms")?;
            if mem_size == 0 {
                return Err(Error::InvalidFormat(format!("segment {i} has zero size")));
            }
            if file_size > mem_size {
                return Err(Error::InvalidFormat(format!(
                    "segment {i} file size {file_size} exceeds mem size {mem_size}"
                )));
            }
            if (file_offset as u64) + (file_size as u64) > payload.len() as u64 {
                return Err(Error::InvalidFormat(format!(
                    "segment {i} source range {file_offset}+{file_size} exceeds payload of {} bytes",
                    payload.len()
                )));
            }
            if seg_perms & !(perms::READ | perms::WRITE | perms::EXEC) != 0 {
                return Err(Error::InvalidFormat(format!(
                    "segment {i} has undefined permission bits {seg_perms:#x}"
                )));
            }
            // W^X holds for the whole lifetime of a loaded image, starting
            // with the declared permissions.
            if seg_perms & perms::WRITE != 0 && seg_perms & perms::EXEC != 0 {
                return Err(Error::InvalidFormat(format!(
                    "segment {i} requests writable+executable permissions"
                )));
            }
            segments.push(Segment {
                vaddr,
                mem_size,
                file_offset,
                file_size,
                perms: seg_perms,
            });
        }

        // Segments must be disjoint. Sorted order is not required of the
        // producer, so check against a sorted view.
        let mut order: Vec<usize> = (0..segments.len()).collect();
        order.sort_by_key(|&i| segments[i].vaddr);
        for pair in order.windows(2) {
            let a = &segments[pair[0]];
            let b = &segments[pair[1]];
            if (a.vaddr as u64) + (a.mem_size as u64) > b.vaddr as u64 {
                return Err(Error::InvalidFormat(format!(
                    "segments {} and {} overlap",
                    pair[0], pair[1]
                )));
            }
        }

        let mut entry_points = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            let vaddr = c.u32("entry vaddr")?;
            let name = c.string("entry name")?;
            let in_exec = segments.iter().any(|s| {
                s.is_exec()
                    && vaddr >= s.vaddr
                    && (vaddr as u64) < (s.vaddr as u64) + (s.mem_size as u64)
            });
            if !in_exec {
                return Err(Error::InvalidFormat(format!(
                    "entry point '{name}' at {vaddr:#x} is not inside an executable segment"
                )));
            }
            entry_points.push(EntryPointDef { name, vaddr });
        }

        let mut relocations = Vec::with_capacity(reloc_count);
        for i in 0..reloc_count {
            let segment = c.u16("relocation segment")?;
            let kind_tag = c.u16("relocation kind")?;
            let offset = c.u32("relocation offset")?;
            let sym_kind = c.u16("symbol kind")?;
            let sym_index = c.u16("symbol index")?;
            let sym_offset = c.u32("symbol offset")?;
            let addend = c.i64("relocation addend")?;

            let kind = RelocKind::from_tag(kind_tag).ok_or_else(|| {
                Error::MalformedRelocation(format!("relocation {i} has unknown kind {kind_tag}"))
            })?;
            let seg = segments.get(segment as usize).ok_or_else(|| {
                Error::MalformedRelocation(format!(
                    "relocation {i} targets invalid segment {segment}"
                ))
            })?;
            if (offset as u64) + (kind.patch_size() as u64) > seg.mem_size as u64 {
                return Err(Error::MalformedRelocation(format!(
                    "relocation {i} at offset {offset:#x} exceeds segment of {} bytes",
                    seg.mem_size
                )));
            }
            let symbol = match sym_kind {
                0 => {
                    let target = segments.get(sym_index as usize).ok_or_else(|| {
                        Error::MalformedRelocation(format!(
                            "relocation {i} references invalid segment {sym_index}"
                        ))
                    })?;
                    if sym_offset as u64 > target.mem_size as u64 {
                        return Err(Error::MalformedRelocation(format!(
                            "relocation {i} symbol offset {sym_offset:#x} outside segment"
                        )));
                    }
                    SymbolRef::Internal {
                        segment: sym_index,
                        offset: sym_offset,
                    }
                }
                1 => {
                    if sym_index as usize >= name_count {
                        return Err(Error::MalformedRelocation(format!(
                            "relocation {i} references symbol name {sym_index} of {name_count}"
                        )));
                    }
                    SymbolRef::External { name: sym_index }
                }
                _ => {
                    return Err(Error::MalformedRelocation(format!(
                        "relocation {i} has unknown symbol kind {sym_kind}"
                    )))
                }
            };
            relocations.push(Relocation {
                segment,
                offset,
                kind,
                symbol,
                addend,
            });
        }

        let mut symbol_names = Vec::with_capacity(name_count);
        for _ in 0..name_count {
            symbol_names.push(c.string("symbol name")?);
        }

        Ok(Image {
            arch,
            modes,
            segments,
            entry_points,
            relocations,
            symbol_names,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(arch: u16) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&IMAGE_MAGIC);
        b.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
        b.extend_from_slice(&arch.to_le_bytes());
        b.extend_from_slice(&MODE_GRAPH.to_le_bytes());
        b.extend_from_slice(&0u16.to_le_bytes()); // segments
        b.extend_from_slice(&0u16.to_le_bytes()); // entries
        b.extend_from_slice(&0u16.to_le_bytes()); // relocations
        b.extend_from_slice(&0u16.to_le_bytes()); // names
        b.extend_from_slice(&0u16.to_le_bytes()); // reserved
        b.extend_from_slice(&28u32.to_le_bytes()); // payload offset
        b.extend_from_slice(&0u32.to_le_bytes()); // payload size
        b
    }

    #[test]
    fn parses_empty_image() {
        let bytes = header(Architecture::X86_64.tag());
        let image = Image::parse(&bytes).unwrap();
        assert_eq!(image.arch, Architecture::X86_64);
        assert!(image.segments.is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = header(1);
        bytes[0] = b'Z';
        assert!(matches!(
            Image::parse(&bytes),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn rejects_unknown_arch_tag() {
        let bytes = header(99);
        assert!(matches!(
            Image::parse(&bytes),
            Err(Error::UnsupportedArchitecture(_))
        ));
    }

    #[test]
    fn rejects_truncated_header() {
        let bytes = header(1);
        assert!(matches!(
            Image::parse(&bytes[..10]),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn rejects_undefined_mode_bits() {
        let mut bytes = header(1);
        bytes[8] = 0xff;
        assert!(matches!(
            Image::parse(&bytes),
            Err(Error::InvalidFormat(_))
        ));
    }
}
