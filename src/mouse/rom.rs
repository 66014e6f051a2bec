//! The AppleMouse card's bank-switched firmware ROM.

use crate::error::CardError;

pub const ROM_SIZE: usize = 2048;
pub const PAGE_SIZE: usize = 256;
pub const NUM_PAGES: usize = 8;

/// Candidate paths probed for a real ROM image before falling back
/// to [`synthesize`] (§6).
pub const CANDIDATE_PATHS: &[&str] = &[
    "mouse.rom",
    "roms/mouse.rom",
    "/usr/share/uthernet2/mouse.rom",
];

/// A placeholder ROM image.
///
/// This crate has no license to redistribute the real AppleMouse
/// firmware, so [`MouseCard::load_or_synthesize`](super::MouseCard::load_or_synthesize)
/// ships a synthesized stand-in instead: every page carries the fixed
/// identification bytes the firmware's detection probe reads, plus
/// `RTS` at the published entry-point offsets so a call into any of
/// them returns harmlessly.
pub fn synthesize() -> [u8; ROM_SIZE] {
    let mut rom = [0u8; ROM_SIZE];
    for page in 0..NUM_PAGES {
        let base = page * PAGE_SIZE;
        rom[base + 0x05] = 0x38;
        rom[base + 0x07] = 0x18;
        rom[base + 0x0b] = 0x01;
        rom[base + 0x0c] = 0x20;
        rom[base + 0xfb] = 0xd6;
        for off in 0x12..0x19 {
            rom[base + off] = 0x60; // RTS
        }
        rom[base + 0x1c] = 0x60; // RTS
    }
    rom
}

/// Load a real ROM image from disk.
pub fn load(path: &std::path::Path) -> Result<[u8; ROM_SIZE], CardError> {
    let bytes = std::fs::read(path)?;
    if bytes.len() != ROM_SIZE {
        return Err(CardError::BadRomSize {
            expected: ROM_SIZE,
            actual: bytes.len(),
        });
    }
    let mut rom = [0u8; ROM_SIZE];
    rom.copy_from_slice(&bytes);
    Ok(rom)
}
