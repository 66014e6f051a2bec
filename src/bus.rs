//! The contract between the slot dispatcher and a card.
//!
//! The dispatcher that routes `$C0nx` soft-switch and `$Cn00..$CnFF`
//! ROM-page accesses to a card is outside this crate's scope; this
//! module only defines the shape of one bus transaction and the
//! trait a card implements to answer it.

/// One CPU access to a card, as delivered by the slot dispatcher.
///
/// Exactly one of [`BusAccess::ploc`] and [`BusAccess::psw`] is
/// `Some`: a card is addressed either through its 256-byte ROM
/// window (`$Cn00..$CnFF`) or through its soft-switch window
/// (`$C0n0..$C0nF`), never both in the same access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusAccess {
    /// Absolute CPU address of the access.
    pub loc: u16,
    /// `None` for a read, `Some(byte)` for a write.
    pub val: Option<u8>,
    /// Offset within the card's 256-byte ROM page, if this access
    /// addressed it.
    pub ploc: Option<u8>,
    /// Offset (0..=15) within the card's soft-switch window, if
    /// this access addressed it.
    pub psw: Option<u8>,
}

impl BusAccess {
    /// Build a ROM-window access.
    pub fn rom(loc: u16, ploc: u8, val: Option<u8>) -> Self {
        BusAccess {
            loc,
            val,
            ploc: Some(ploc),
            psw: None,
        }
    }

    /// Build a soft-switch access.
    pub fn soft_switch(loc: u16, psw: u8, val: Option<u8>) -> Self {
        BusAccess {
            loc,
            val,
            ploc: None,
            psw: Some(psw),
        }
    }
}

/// A peripheral card that can be installed in a slot.
///
/// The dispatcher calls [`Peripheral::init`] once before emulation
/// starts and [`Peripheral::handle`] for every bus access routed to
/// the card. The return value of `handle` is the byte delivered to
/// the CPU on reads; it is ignored on writes.
pub trait Peripheral {
    /// One-time setup, called before the card is used.
    fn init(&mut self);

    /// Service one bus access. Returns the byte seen by the CPU on
    /// a read; the return value of a write is unspecified and
    /// should be ignored by callers.
    fn handle(&mut self, access: BusAccess) -> u8;
}
