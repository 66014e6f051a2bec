//! End-to-end AppleMouse scenario: move the mouse via an absolute
//! position and drain the resulting quadrature through ORA, the way
//! guest firmware does.

use uthernet2::{BusAccess, MouseCard, Peripheral};

const PSW_ORA: u8 = 0;
const PSW_ORB: u8 = 1;
const PSW_CRA: u8 = 2;
const PSW_CRB: u8 = 3;
const CR_DATA_SELECT: u8 = 0x04;

fn select_data_registers(card: &mut MouseCard) {
    card.handle(BusAccess::soft_switch(0xc480, PSW_CRA, Some(CR_DATA_SELECT)));
    card.handle(BusAccess::soft_switch(0xc480, PSW_CRB, Some(CR_DATA_SELECT)));
}

#[test]
fn quadrature_drains_toward_zero_and_then_settles() {
    let mut card = MouseCard::new();
    select_data_registers(&mut card);
    card.set_position(600, 512);

    for _ in 0..88 {
        let byte = card.handle(BusAccess::soft_switch(0xc480, PSW_ORA, None));
        assert_ne!(byte & 0x02, 0, "should read x direction = right while draining");
    }
    let settled = card.handle(BusAccess::soft_switch(0xc480, PSW_ORA, None));
    assert_eq!(settled & 0x03, 0);

    let (x, y, _) = card.get_state();
    assert_eq!((x, y), (600, 512));
}

#[test]
fn button_release_sets_the_active_low_bit() {
    let mut card = MouseCard::new();
    select_data_registers(&mut card);
    card.set_button(false);
    let byte = card.handle(BusAccess::soft_switch(0xc480, PSW_ORA, None));
    assert_eq!(byte & 0x80, 0x80);
}

#[test]
fn rom_entry_points_are_harmless_across_every_bank() {
    let mut card = MouseCard::new();
    for page in 0..8u8 {
        select_data_registers(&mut card);
        card.handle(BusAccess::soft_switch(0xc480, PSW_ORB, Some(page)));
        for off in 0x12u8..0x19 {
            let entry = card.handle(BusAccess::rom(0xc400, off, None));
            assert_eq!(entry, 0x60, "page {page} offset {off:#x} should be RTS");
        }
    }
}
