use super::{Memory, MemoryError};
use crate::diagnostics::SharedDiagnostics;

const CACHE_SIZE: usize = 4 * 1024;

/// The view active while the status register isolates the cache. Loads and stores only touch the
/// 4 KiB instruction cache, which is how the BIOS flushes it, and the wrapped view stays untouched.
pub struct CacheView {
    hidden: Box<dyn Memory>,
    lines: Box<[u8; CACHE_SIZE]>,
    diagnostics: Option<SharedDiagnostics>,
}

impl CacheView {
    pub fn new(hidden: Box<dyn Memory>) -> Self {
        Self {
            hidden,
            lines: Box::new([0; CACHE_SIZE]),
            diagnostics: None,
        }
    }

    pub fn hidden(&self) -> &dyn Memory {
        &*self.hidden
    }

    pub fn hidden_mut(&mut self) -> &mut dyn Memory {
        &mut *self.hidden
    }

    pub fn into_hidden(self) -> Box<dyn Memory> {
        self.hidden
    }

    const fn line_offset(address: u32) -> usize {
        address as usize & (CACHE_SIZE - 1)
    }
}

impl Memory for CacheView {
    fn read_u8(&self, address: u32) -> Result<u8, MemoryError> {
        Ok(self.lines[Self::line_offset(address)])
    }

    fn write_u8(&mut self, address: u32, value: u8) -> Result<(), MemoryError> {
        self.lines[Self::line_offset(address)] = value;
        Ok(())
    }

    fn reset(&mut self) {
        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.debug(format_args!("resetting isolated cache"));
        }
        self.lines.fill(0);
        self.hidden.reset();
    }

    fn set_diagnostics(&mut self, diagnostics: SharedDiagnostics) {
        self.hidden.set_diagnostics(diagnostics.clone());
        self.diagnostics = Some(diagnostics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Ram;

    #[test]
    fn addresses_wrap_around_the_cache() {
        let mut cache = CacheView::new(Box::new(Ram::new()));
        cache.write_u32(0x0000_1004, 0x1234_5678).unwrap();
        assert_eq!(cache.read_u32(0x0000_0004), Ok(0x1234_5678));
        assert_eq!(cache.hidden().read_u32(0x0000_1004), Ok(0));
    }
}
