//! The PlayStation memory map:
//!
//! KUSEG     KSEG0     KSEG1
//! 00000000h 80000000h A0000000h  2048K  Main RAM, mirrored four times
//! 1F000000h 9F000000h BF000000h  8192K  Expansion Region 1
//! 1F800000h 9F800000h    --      1K     Scratchpad
//! 1F801000h 9F801000h BF801000h  8K     I/O Ports
//! 1FC00000h 9FC00000h BFC00000h  512K   BIOS ROM
//!       FFFE0000h (KSEG2)        0.5K   Cache Control

use super::{Memory, MemoryError};
use crate::diagnostics::SharedDiagnostics;
use std::ops::Range;

const MAIN_RAM_SIZE: usize = 2 * 1024 * 1024;
const BIOS_SIZE: usize = 512 * 1024;

const MAIN_RAM: Range<u32> = 0x0000_0000..0x0080_0000;
const EXPANSION_1: Range<u32> = 0x1F00_0000..0x1F80_0000;
const SCRATCHPAD: Range<u32> = 0x1F80_0000..0x1F80_0400;
const IO_PORTS: Range<u32> = 0x1F80_1000..0x1F80_3000;
const BIOS: Range<u32> = 0x1FC0_0000..0x1FC8_0000;
const CACHE_CONTROL: Range<u32> = 0xFFFE_0000..0xFFFE_0200;

/// Strips the segment bits, selected by the top three bits of the address. KSEG2 is left alone.
const REGION_MASK: [u32; 8] = [
    // KUSEG: 2048MB
    0xFFFF_FFFF, 0xFFFF_FFFF, 0xFFFF_FFFF, 0xFFFF_FFFF,
    // KSEG0: 512MB
    0x7FFF_FFFF,
    // KSEG1: 512MB
    0x1FFF_FFFF,
    // KSEG2: 1024MB
    0xFFFF_FFFF, 0xFFFF_FFFF,
];

const fn size(range: &Range<u32>) -> usize {
    (range.end - range.start) as usize
}

pub const fn mask_region(address: u32) -> u32 {
    address & REGION_MASK[(address >> 29) as usize]
}

enum Region {
    MainRam(usize),
    Expansion1,
    Scratchpad(usize),
    Io(usize),
    Bios(usize),
    CacheControl(usize),
}

fn offset_in(range: &Range<u32>, address: u32) -> Option<usize> {
    range
        .contains(&address)
        .then(|| (address - range.start) as usize)
}

/// Main RAM, scratchpad and BIOS ROM. Hardware registers are plain latches: what is written is read back.
pub struct Ram {
    main: Box<[u8]>,
    scratchpad: Box<[u8]>,
    io: Box<[u8]>,
    cache_control: Box<[u8]>,
    bios: Box<[u8]>,
    /// Program images and their offsets in main RAM, restored on every reset.
    images: Vec<(usize, Box<[u8]>)>,
    diagnostics: Option<SharedDiagnostics>,
}

impl Ram {
    pub fn new() -> Self {
        Self {
            main: vec![0; MAIN_RAM_SIZE].into_boxed_slice(),
            scratchpad: vec![0; size(&SCRATCHPAD)].into_boxed_slice(),
            io: vec![0; size(&IO_PORTS)].into_boxed_slice(),
            cache_control: vec![0; size(&CACHE_CONTROL)].into_boxed_slice(),
            bios: vec![0; BIOS_SIZE].into_boxed_slice(),
            images: Vec::new(),
            diagnostics: None,
        }
    }

    /// Installs a BIOS image, which may be smaller than the ROM.
    pub fn with_bios(mut self, image: &[u8]) -> Result<Self, MemoryError> {
        let rom = self.bios.get_mut(..image.len()).ok_or(MemoryError::OutOfBounds {
            address: BIOS.start,
            len: image.len(),
        })?;
        rom.copy_from_slice(image);
        Ok(self)
    }

    /// Copies a program image into main RAM at the given (possibly segmented) address. Like the BIOS,
    /// loaded images survive a reset.
    pub fn load(&mut self, address: u32, image: &[u8]) -> Result<(), MemoryError> {
        let out_of_bounds = MemoryError::OutOfBounds {
            address,
            len: image.len(),
        };
        let Some(Region::MainRam(offset)) = Self::decode(address) else {
            return Err(out_of_bounds);
        };
        let dest = self
            .main
            .get_mut(offset..offset + image.len())
            .ok_or(out_of_bounds)?;
        dest.copy_from_slice(image);
        self.images.push((offset, image.into()));
        Ok(())
    }

    fn decode(address: u32) -> Option<Region> {
        let physical = mask_region(address);
        if let Some(offset) = offset_in(&MAIN_RAM, physical) {
            Some(Region::MainRam(offset % MAIN_RAM_SIZE))
        } else if offset_in(&EXPANSION_1, physical).is_some() {
            Some(Region::Expansion1)
        } else if let Some(offset) = offset_in(&SCRATCHPAD, physical) {
            Some(Region::Scratchpad(offset))
        } else if let Some(offset) = offset_in(&IO_PORTS, physical) {
            Some(Region::Io(offset))
        } else if let Some(offset) = offset_in(&BIOS, physical) {
            Some(Region::Bios(offset))
        } else {
            offset_in(&CACHE_CONTROL, physical).map(Region::CacheControl)
        }
    }

    fn trace(&self, args: std::fmt::Arguments<'_>) {
        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.log(log::Level::Trace, args);
        }
    }
}

impl Default for Ram {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory for Ram {
    fn read_u8(&self, address: u32) -> Result<u8, MemoryError> {
        match Self::decode(address).ok_or(MemoryError::Unmapped { address })? {
            Region::MainRam(offset) => Ok(self.main[offset]),
            // Nothing is plugged into the parallel port.
            Region::Expansion1 => Ok(0xFF),
            Region::Scratchpad(offset) => Ok(self.scratchpad[offset]),
            Region::Io(offset) => {
                self.trace(format_args!("I/O read at {address:#010x}"));
                Ok(self.io[offset])
            }
            Region::Bios(offset) => Ok(self.bios[offset]),
            Region::CacheControl(offset) => Ok(self.cache_control[offset]),
        }
    }

    fn write_u8(&mut self, address: u32, value: u8) -> Result<(), MemoryError> {
        match Self::decode(address).ok_or(MemoryError::Unmapped { address })? {
            Region::MainRam(offset) => self.main[offset] = value,
            Region::Expansion1 | Region::Bios(_) => return Err(MemoryError::ReadOnly { address }),
            Region::Scratchpad(offset) => self.scratchpad[offset] = value,
            Region::Io(offset) => {
                self.trace(format_args!("I/O write {value:#04x} at {address:#010x}"));
                self.io[offset] = value;
            }
            Region::CacheControl(offset) => self.cache_control[offset] = value,
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.main.fill(0);
        self.scratchpad.fill(0);
        self.io.fill(0);
        self.cache_control.fill(0);
        for (offset, image) in &self.images {
            self.main[*offset..*offset + image.len()].copy_from_slice(image);
        }
    }

    fn set_diagnostics(&mut self, diagnostics: SharedDiagnostics) {
        self.diagnostics = Some(diagnostics);
    }
}
