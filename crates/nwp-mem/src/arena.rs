//! Carving a caller buffer into component regions.
//!
//! Components declare what they need in a [`MemoryPlan`]; the [`Arena`]
//! then hands out disjoint, bounds-checked regions in declaration order.
//! The buffer start is aligned to [`ALIGN`] bytes and begins with a
//! little-endian `u32` header holding the usable length.

use crate::MemError;

/// Alignment of the buffer start and of every region size.
pub const ALIGN: usize = 4;

/// Bytes reserved for the length header.
pub const HEADER_LEN: usize = 4;

/// Rounds `size` up to the next multiple of [`ALIGN`].
pub const fn align_up(size: usize) -> usize {
    (size + ALIGN - 1) & !(ALIGN - 1)
}

/// A single `(component, size)` entry of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    pub component: &'static str,
    pub size: usize,
}

/// Ordered list of memory requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryPlan {
    requirements: Vec<Requirement>,
}

impl MemoryPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a requirement.
    pub fn with(mut self, component: &'static str, size: usize) -> Self {
        self.push(component, size);
        self
    }

    pub fn push(&mut self, component: &'static str, size: usize) {
        self.requirements.push(Requirement { component, size });
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Total bytes needed after alignment, header included.
    pub fn required_bytes(&self) -> usize {
        HEADER_LEN
            + self
                .requirements
                .iter()
                .map(|req| align_up(req.size))
                .sum::<usize>()
    }
}

/// A region carved for one component.
#[derive(Debug)]
pub struct Region<'a> {
    component: &'static str,
    bytes: &'a mut [u8],
}

impl<'a> Region<'a> {
    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> &'a mut [u8] {
        self.bytes
    }
}

/// Bump carver over a borrowed buffer.
#[derive(Debug)]
pub struct Arena<'a> {
    remaining: &'a mut [u8],
    used: usize,
    capacity: usize,
}

impl<'a> Arena<'a> {
    /// Aligns and zeroes `buffer`, then writes the length header.
    ///
    /// Leading bytes skipped for alignment are not counted as usable.
    pub fn new(buffer: &'a mut [u8]) -> Result<Self, MemError> {
        let provided = buffer.len();
        let skip = buffer.as_ptr().align_offset(ALIGN).min(provided);
        let (_, aligned) = buffer.split_at_mut(skip);
        if aligned.len() < HEADER_LEN {
            return Err(MemError::BufferTooSmall {
                required: HEADER_LEN,
                available: aligned.len(),
            });
        }

        aligned.fill(0);
        let capacity = aligned.len();
        let (header, rest) = aligned.split_at_mut(HEADER_LEN);
        header.copy_from_slice(&(capacity as u32).to_le_bytes());

        Ok(Self {
            remaining: rest,
            used: HEADER_LEN,
            capacity,
        })
    }

    /// Usable bytes after alignment, header included.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far, header included.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Bytes not yet carved.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }

    /// Carves the next region. The size is rounded up to [`ALIGN`].
    pub fn carve(&mut self, component: &'static str, size: usize) -> Result<Region<'a>, MemError> {
        let size = align_up(size);
        if size > self.remaining.len() {
            return Err(MemError::BufferTooSmall {
                required: self.used + size,
                available: self.capacity,
            });
        }
        let rest = core::mem::take(&mut self.remaining);
        let (bytes, tail) = rest.split_at_mut(size);
        self.remaining = tail;
        self.used += size;
        log::trace!("carved {size} bytes for {component}");
        Ok(Region { component, bytes })
    }

    /// Carves every requirement of `plan`, failing before carving anything
    /// when the buffer cannot hold the whole plan.
    pub fn allocate(&mut self, plan: &MemoryPlan) -> Result<Vec<Region<'a>>, MemError> {
        let required = self.used + plan.required_bytes() - HEADER_LEN;
        if required > self.capacity {
            return Err(MemError::BufferTooSmall {
                required,
                available: self.capacity,
            });
        }
        plan.requirements()
            .iter()
            .map(|req| self.carve(req.component, req.size))
            .collect()
    }
}
