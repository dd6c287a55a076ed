use std::collections::BTreeMap;

use bitflags::bitflags;
use thiserror::Error;

use crate::helper::DataType;

bitflags! {
    /// Segment permissions in the target address space.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Perms: u8 {
        const READ = 1;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

/// Host-side view of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub base: u64,
    pub len: u64,
    pub perms: Perms,
}

impl Segment {
    pub fn end(&self) -> u64 {
        self.base + self.len
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Scalar(DataType),
    /// unnamed gap of the given byte length
    Reserved(u64),
}

impl FieldType {
    pub fn len(&self) -> u64 {
        match self {
            Self::Scalar(ty) => ty.bytes(),
            Self::Reserved(len) => *len,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    pub name: String,
    pub offset: u64,
    pub ty: FieldType,
}

/// Failure reported by an [`AddressSpace`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("segment {base:#x}..{end:#x} overlaps the segment at {existing:#x}")]
    SegmentOverlap {
        base: u64,
        end: u64,
        existing: u64,
    },
    #[error("segment of zero length at {0:#x}")]
    EmptySegment(u64),
    #[error("no type named `{0}`")]
    UnknownType(String),
    #[error("{0}")]
    Backend(String),
}

/// The five capabilities this tool needs from its host. The host's
/// storage engine stays behind this trait; the import only ever calls
/// through it.
///
/// `define_struct_type` replaces an existing type of the same name and
/// `set_comment` replaces the comment at an address. Both are what make
/// re-imports converge instead of accumulating duplicates.
pub trait AddressSpace {
    fn create_segment(&mut self, base: u64, len: u64, perms: Perms) -> Result<(), HostError>;

    fn find_segment_at(&self, addr: u64) -> Option<Segment>;

    fn define_struct_type(
        &mut self,
        name: &str,
        fields: &[StructField],
    ) -> Result<(), HostError>;

    fn apply_type_at(&mut self, addr: u64, type_name: &str) -> Result<(), HostError>;

    fn set_comment(&mut self, addr: u64, text: &str) -> Result<(), HostError>;
}

/// In-memory address space. Backs the test suite and lets embedders
/// preview an import without touching a live database.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemorySpace {
    // kept sorted by base
    segments: Vec<Segment>,
    types: BTreeMap<String, Vec<StructField>>,
    applied: BTreeMap<u64, String>,
    comments: BTreeMap<u64, String>,
}

impl MemorySpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn struct_type(&self, name: &str) -> Option<&[StructField]> {
        self.types.get(name).map(Vec::as_slice)
    }

    pub fn type_at(&self, addr: u64) -> Option<&str> {
        self.applied.get(&addr).map(String::as_str)
    }

    pub fn comment_at(&self, addr: u64) -> Option<&str> {
        self.comments.get(&addr).map(String::as_str)
    }

    pub fn comments(&self) -> impl Iterator<Item = (u64, &str)> {
        self.comments.iter().map(|(addr, text)| (*addr, text.as_str()))
    }
}

impl AddressSpace for MemorySpace {
    fn create_segment(&mut self, base: u64, len: u64, perms: Perms) -> Result<(), HostError> {
        if len == 0 {
            return Err(HostError::EmptySegment(base));
        }
        let end = base + len;
        if let Some(existing) = self
            .segments
            .iter()
            .find(|seg| base < seg.end() && seg.base < end)
        {
            return Err(HostError::SegmentOverlap {
                base,
                end,
                existing: existing.base,
            });
        }
        let at = self
            .segments
            .partition_point(|seg| seg.base < base);
        self.segments.insert(at, Segment { base, len, perms });
        Ok(())
    }

    fn find_segment_at(&self, addr: u64) -> Option<Segment> {
        self.segments.iter().find(|seg| seg.contains(addr)).copied()
    }

    fn define_struct_type(
        &mut self,
        name: &str,
        fields: &[StructField],
    ) -> Result<(), HostError> {
        self.types.insert(name.to_owned(), fields.to_vec());
        Ok(())
    }

    fn apply_type_at(&mut self, addr: u64, type_name: &str) -> Result<(), HostError> {
        if !self.types.contains_key(type_name) {
            return Err(HostError::UnknownType(type_name.to_owned()));
        }
        self.applied.insert(addr, type_name.to_owned());
        Ok(())
    }

    fn set_comment(&mut self, addr: u64, text: &str) -> Result<(), HostError> {
        self.comments.insert(addr, text.to_owned());
        Ok(())
    }
}
