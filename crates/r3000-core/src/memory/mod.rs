//! Guest memory as seen by the CPU.

use crate::diagnostics::SharedDiagnostics;
use r3000_decomp::Exception;

pub use self::{cache::CacheView, ram::Ram};

mod cache;
mod ram;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("unmapped address {address:#010x}")]
    Unmapped { address: u32 },
    #[error("write to read-only address {address:#010x}")]
    ReadOnly { address: u32 },
    #[error("image of {len:#x} bytes does not fit at {address:#010x}")]
    OutOfBounds { address: u32, len: usize },
}

impl MemoryError {
    pub const fn exception(&self) -> Exception {
        Exception::DataBusError
    }
}

/// A little-endian, byte addressable guest address space.
pub trait Memory {
    fn read_u8(&self, address: u32) -> Result<u8, MemoryError>;

    fn write_u8(&mut self, address: u32, value: u8) -> Result<(), MemoryError>;

    fn read_u16(&self, address: u32) -> Result<u16, MemoryError> {
        Ok(u16::from_le_bytes([
            self.read_u8(address)?,
            self.read_u8(address.wrapping_add(1))?,
        ]))
    }

    fn read_u32(&self, address: u32) -> Result<u32, MemoryError> {
        let mut bytes = [0; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.read_u8(address.wrapping_add(i as u32))?;
        }
        Ok(u32::from_le_bytes(bytes))
    }

    fn write_u16(&mut self, address: u32, value: u16) -> Result<(), MemoryError> {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.write_u8(address.wrapping_add(i as u32), byte)?;
        }
        Ok(())
    }

    fn write_u32(&mut self, address: u32, value: u32) -> Result<(), MemoryError> {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.write_u8(address.wrapping_add(i as u32), byte)?;
        }
        Ok(())
    }

    /// Brings the memory back to its power-on state.
    fn reset(&mut self);

    fn set_diagnostics(&mut self, _diagnostics: SharedDiagnostics) {}
}

/// The memory view the CPU currently addresses. Setting the isolate cache bit in the status register
/// swaps a direct view for a cache view, which owns the view it replaced and hands it back once the bit clears.
pub enum MemoryView {
    Direct(Box<dyn Memory>),
    Isolated(CacheView),
}

impl MemoryView {
    pub fn new(memory: impl Memory + 'static) -> Self {
        Self::Direct(Box::new(memory))
    }

    pub const fn is_isolated(&self) -> bool {
        matches!(self, Self::Isolated(_))
    }

    /// Wraps the view in a fresh cache view. Already isolated views are returned unchanged.
    pub fn isolate(self) -> Self {
        match self {
            Self::Direct(memory) => Self::Isolated(CacheView::new(memory)),
            isolated @ Self::Isolated(_) => isolated,
        }
    }

    /// Returns the exact view that was wrapped by [`MemoryView::isolate`].
    pub fn unisolate(self) -> Self {
        match self {
            Self::Isolated(cache) => Self::Direct(cache.into_hidden()),
            direct @ Self::Direct(_) => direct,
        }
    }

    /// The memory underneath any cache view. Instructions are always fetched from here.
    pub fn backing(&self) -> &dyn Memory {
        match self {
            Self::Direct(memory) => memory.as_ref(),
            Self::Isolated(cache) => cache.hidden(),
        }
    }

    pub fn backing_mut(&mut self) -> &mut dyn Memory {
        match self {
            Self::Direct(memory) => memory.as_mut(),
            Self::Isolated(cache) => cache.hidden_mut(),
        }
    }

    fn active(&self) -> &dyn Memory {
        match self {
            Self::Direct(memory) => memory.as_ref(),
            Self::Isolated(cache) => cache,
        }
    }

    fn active_mut(&mut self) -> &mut dyn Memory {
        match self {
            Self::Direct(memory) => memory.as_mut(),
            Self::Isolated(cache) => cache,
        }
    }
}

impl Memory for MemoryView {
    fn read_u8(&self, address: u32) -> Result<u8, MemoryError> {
        self.active().read_u8(address)
    }

    fn read_u16(&self, address: u32) -> Result<u16, MemoryError> {
        self.active().read_u16(address)
    }

    fn read_u32(&self, address: u32) -> Result<u32, MemoryError> {
        self.active().read_u32(address)
    }

    fn write_u8(&mut self, address: u32, value: u8) -> Result<(), MemoryError> {
        self.active_mut().write_u8(address, value)
    }

    fn write_u16(&mut self, address: u32, value: u16) -> Result<(), MemoryError> {
        self.active_mut().write_u16(address, value)
    }

    fn write_u32(&mut self, address: u32, value: u32) -> Result<(), MemoryError> {
        self.active_mut().write_u32(address, value)
    }

    fn reset(&mut self) {
        self.active_mut().reset()
    }

    fn set_diagnostics(&mut self, diagnostics: SharedDiagnostics) {
        self.active_mut().set_diagnostics(diagnostics)
    }
}

impl std::fmt::Debug for MemoryView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct(_) => f.write_str("MemoryView::Direct"),
            Self::Isolated(_) => f.write_str("MemoryView::Isolated"),
        }
    }
}
