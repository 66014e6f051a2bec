//! Emulation of a WIZnet W5100-based Uthernet II card and an
//! AppleMouse card for an Apple II emulator.
//!
//! [`w5100::Uthernet2`] answers bus accesses the way the real card's
//! register file would, including a synthesized ARP/DHCP/TCP network
//! (see [`w5100::virtual_net`]) behind its MACRAW socket so that
//! guest software talking to "the network" ends up talking to real
//! host sockets without any actual Ethernet segment existing.
//! [`mouse::MouseCard`] emulates the simpler 6821-PIA-plus-ROM
//! AppleMouse card. Both implement [`bus::Peripheral`], the contract
//! a slot dispatcher (outside this crate's scope) uses to route bus
//! accesses to an installed card.

pub mod bus;
pub mod error;
pub mod mouse;
pub mod w5100;

pub use bus::{BusAccess, Peripheral};
pub use error::CardError;
pub use mouse::MouseCard;
pub use w5100::Uthernet2;
