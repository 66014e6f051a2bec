//! The AppleMouse card: a 6821 PIA and the ROM bank it gates.
//!
//! ORA/ORB are gated by bit 2 of the matching control register
//! (CRA/CRB): set selects the data register, clear selects the
//! data-direction register, the way a real 6821 behaves. ORB's low
//! three bits double as the visible 256-byte ROM page (the page
//! select formula some firmware comments attribute to ORB bit 7
//! doesn't match what firmware actually reads; the low bits are
//! preserved here, see `DESIGN.md`).

pub mod rom;

use crate::bus::{BusAccess, Peripheral};

const PSW_ORA: u8 = 0;
const PSW_ORB: u8 = 1;
const PSW_CRA: u8 = 2;
const PSW_CRB: u8 = 3;

const CR_DATA_SELECT: u8 = 0x04;

/// Mouse quadrature space is centered on (512, 512); firmware clamps
/// absolute position into 0..=1023 on both axes.
const ORIGIN: i32 = 512;

pub struct MouseCard {
    rom: [u8; rom::ROM_SIZE],
    ora: u8,
    orb: u8,
    cra: u8,
    crb: u8,
    ddra: u8,
    ddrb: u8,
    x: i32,
    y: i32,
    dx: i32,
    dy: i32,
    x_tick: bool,
    y_tick: bool,
    button: bool,
    slot: u8,
}

impl MouseCard {
    pub fn new() -> Self {
        MouseCard {
            rom: rom::synthesize(),
            ora: 0,
            orb: 0,
            cra: 0,
            crb: 0,
            ddra: 0,
            ddrb: 0,
            x: ORIGIN,
            y: ORIGIN,
            dx: 0,
            dy: 0,
            x_tick: false,
            y_tick: false,
            button: false,
            slot: 0,
        }
    }

    pub fn with_rom(rom: [u8; rom::ROM_SIZE]) -> Self {
        MouseCard { rom, ..Self::new() }
    }

    /// Record which Apple II slot (1..7) the dispatcher installed
    /// this card into; used only for logging (§6, §10.3).
    pub fn set_slot(&mut self, slot: u8) {
        log::info!("mouse: installed in slot {slot}");
        self.slot = slot;
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    /// Probe the candidate paths in [`rom::CANDIDATE_PATHS`] for a
    /// real ROM image, falling back to [`rom::synthesize`] if none
    /// is found or readable (§6).
    pub fn load_or_synthesize() -> Self {
        for candidate in rom::CANDIDATE_PATHS {
            if let Ok(rom) = rom::load(std::path::Path::new(candidate)) {
                return Self::with_rom(rom);
            }
        }
        Self::new()
    }

    /// Load a ROM image from an explicit path, surfacing I/O and
    /// size errors rather than falling back silently (§10.2).
    pub fn load_rom_from(path: &std::path::Path) -> Result<Self, crate::error::CardError> {
        Ok(Self::with_rom(rom::load(path)?))
    }

    /// Move the mouse to an absolute position, accumulating the
    /// resulting delta into the quadrature counters (§4.8).
    pub fn set_position(&mut self, x: i32, y: i32) {
        self.dx += x - self.x;
        self.dy += y - self.y;
        self.x = x;
        self.y = y;
    }

    pub fn set_button(&mut self, down: bool) {
        self.button = down;
    }

    /// Current absolute position and button state.
    pub fn get_state(&self) -> (i32, i32, bool) {
        (self.x, self.y, self.button)
    }

    fn current_page(&self) -> usize {
        (self.orb & 0x07) as usize
    }

    /// Read ORA's synthetic quadrature/button byte, consuming one
    /// unit of the accumulated delta on each axis that still has any
    /// (§4.8, §8 scenario 6).
    fn read_ora(&mut self) -> u8 {
        let mut byte = 0u8;
        if self.dx != 0 {
            if self.dx > 0 {
                byte |= 0x02;
                self.dx -= 1;
            } else {
                self.dx += 1;
            }
            self.x_tick = !self.x_tick;
        }
        if self.dy != 0 {
            if self.dy > 0 {
                byte |= 0x04;
                self.dy -= 1;
            } else {
                self.dy += 1;
            }
            self.y_tick = !self.y_tick;
        }
        if self.x_tick {
            byte |= 0x01;
        }
        if self.y_tick {
            byte |= 0x08;
        }
        if !self.button {
            byte |= 0x80;
        }
        byte
    }
}

impl Default for MouseCard {
    fn default() -> Self {
        Self::new()
    }
}

impl Peripheral for MouseCard {
    fn init(&mut self) {
        self.ora = 0;
        self.orb = 0;
        self.cra = 0;
        self.crb = 0;
        self.ddra = 0;
        self.ddrb = 0;
    }

    fn handle(&mut self, access: BusAccess) -> u8 {
        if let Some(ploc) = access.ploc {
            let page = self.current_page();
            return self.rom[page * rom::PAGE_SIZE + ploc as usize];
        }
        let psw = match access.psw {
            Some(p) => p & 0x03,
            None => return 0,
        };
        match (psw, access.val) {
            (PSW_ORA, None) => {
                if self.cra & CR_DATA_SELECT != 0 {
                    self.read_ora()
                } else {
                    self.ddra
                }
            }
            (PSW_ORA, Some(v)) => {
                if self.cra & CR_DATA_SELECT != 0 {
                    self.ora = v;
                } else {
                    self.ddra = v;
                }
                0
            }
            (PSW_ORB, None) => {
                if self.crb & CR_DATA_SELECT != 0 {
                    self.orb
                } else {
                    self.ddrb
                }
            }
            (PSW_ORB, Some(v)) => {
                if self.crb & CR_DATA_SELECT != 0 {
                    self.orb = v;
                } else {
                    self.ddrb = v;
                }
                0
            }
            (PSW_CRA, None) => self.cra,
            (PSW_CRA, Some(v)) => {
                self.cra = v;
                0
            }
            (PSW_CRB, None) => self.crb,
            (PSW_CRB, Some(v)) => {
                self.crb = v;
                0
            }
            _ => unreachable!("psw masked to 0..=3"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select_data(card: &mut MouseCard, cra: bool, crb: bool) {
        card.handle(BusAccess::soft_switch(0xc080, PSW_CRA, Some(if cra { CR_DATA_SELECT } else { 0 })));
        card.handle(BusAccess::soft_switch(0xc080, PSW_CRB, Some(if crb { CR_DATA_SELECT } else { 0 })));
    }

    fn select_page(card: &mut MouseCard, page: u8) {
        select_data(card, true, true);
        card.handle(BusAccess::soft_switch(0xc080, PSW_ORB, Some(page)));
    }

    #[test]
    fn rom_window_follows_orb_page_select() {
        let mut card = MouseCard::new();
        select_page(&mut card, 3);
        let byte = card.handle(BusAccess::rom(0xc300, 0x05, None));
        assert_eq!(byte, 0x38);
        let byte = card.handle(BusAccess::rom(0xc300, 0x07, None));
        assert_eq!(byte, 0x18);
    }

    #[test]
    fn ddr_gating_separates_direction_register_from_data_register() {
        let mut card = MouseCard::new();
        select_data(&mut card, false, true);
        card.handle(BusAccess::soft_switch(0xc080, PSW_ORA, Some(0xff)));
        assert_eq!(card.ddra, 0xff);
        assert_eq!(card.ora, 0);

        select_data(&mut card, true, true);
        card.set_position(ORIGIN + 1, ORIGIN);
        let byte = card.handle(BusAccess::soft_switch(0xc080, PSW_ORA, None));
        assert_ne!(byte & 0x02, 0);
    }

    #[test]
    fn quadrature_drains_over_the_full_delta_then_settles() {
        let mut card = MouseCard::new();
        select_data(&mut card, true, true);
        card.set_position(600, 512);

        let mut last = 0u8;
        for _ in 0..88 {
            last = card.handle(BusAccess::soft_switch(0xc080, PSW_ORA, None));
            assert_ne!(last & 0x02, 0, "x direction should read right while draining");
        }
        let _ = last;

        let settled = card.handle(BusAccess::soft_switch(0xc080, PSW_ORA, None));
        assert_eq!(settled & 0x03, 0);
    }

    #[test]
    fn releasing_the_button_sets_the_active_low_bit() {
        let mut card = MouseCard::new();
        select_data(&mut card, true, true);
        card.set_button(true);
        let pressed = card.handle(BusAccess::soft_switch(0xc080, PSW_ORA, None));
        assert_eq!(pressed & 0x80, 0);

        card.set_button(false);
        let released = card.handle(BusAccess::soft_switch(0xc080, PSW_ORA, None));
        assert_eq!(released & 0x80, 0x80);
    }
}
