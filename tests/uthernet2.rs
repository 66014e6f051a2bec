//! End-to-end scenarios: driving the card the way a guest ROM would,
//! through its bus interface alone.

use uthernet2::{BusAccess, Peripheral, Uthernet2};
use uthernet2::w5100::regs;
use uthernet2::w5100::socket::SocketCommand;

const PSW_ADDR_HI: u8 = 5;
const PSW_ADDR_LO: u8 = 6;
const PSW_DATA: u8 = 7;

fn write_indirect(card: &mut Uthernet2, addr: u16, val: u8) {
    card.handle(BusAccess::soft_switch(0xc090, PSW_ADDR_HI, Some((addr >> 8) as u8)));
    card.handle(BusAccess::soft_switch(0xc091, PSW_ADDR_LO, Some((addr & 0xff) as u8)));
    card.handle(BusAccess::soft_switch(0xc092, PSW_DATA, Some(val)));
}

fn read_indirect(card: &mut Uthernet2, addr: u16) -> u8 {
    card.handle(BusAccess::soft_switch(0xc090, PSW_ADDR_HI, Some((addr >> 8) as u8)));
    card.handle(BusAccess::soft_switch(0xc091, PSW_ADDR_LO, Some((addr & 0xff) as u8)));
    card.handle(BusAccess::soft_switch(0xc092, PSW_DATA, None))
}

#[test]
fn detection_probe_sees_default_identity_registers() {
    let mut card = Uthernet2::new();
    for (i, &b) in regs::DEFAULT_MAC.iter().enumerate() {
        assert_eq!(read_indirect(&mut card, regs::SHAR + i as u16), b);
    }
}

#[test]
fn rom_window_detection_probe() {
    let mut card = Uthernet2::new();
    assert_eq!(card.handle(BusAccess::rom(0xc300, 0x05, None)), 0x38);
    assert_eq!(card.handle(BusAccess::rom(0xc300, 0x07, None)), 0x18);
    assert_eq!(card.handle(BusAccess::rom(0xc300, 0x00, None)), 0x00);
    assert_eq!(card.handle(BusAccess::rom(0xc300, 0xff, None)), 0x00);
}

#[test]
fn indirect_write_read_with_auto_increment_across_a_block() {
    let mut card = Uthernet2::new();
    write_indirect(&mut card, regs::MR, regs::MR_AI);

    card.handle(BusAccess::soft_switch(0xc090, PSW_ADDR_HI, Some(0x20)));
    card.handle(BusAccess::soft_switch(0xc091, PSW_ADDR_LO, Some(0x00)));
    for b in 0..16u8 {
        card.handle(BusAccess::soft_switch(0xc092, PSW_DATA, Some(b)));
    }

    card.handle(BusAccess::soft_switch(0xc090, PSW_ADDR_HI, Some(0x20)));
    card.handle(BusAccess::soft_switch(0xc091, PSW_ADDR_LO, Some(0x00)));
    for expected in 0..16u8 {
        let got = card.handle(BusAccess::soft_switch(0xc092, PSW_DATA, None));
        assert_eq!(got, expected);
    }
}

#[test]
fn socket_zero_tcp_connect_redirects_to_localhost() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut card = Uthernet2::new();
    let base = regs::socket_base(0);
    write_indirect(&mut card, base + regs::SN_MR, 0x01); // TCP
    write_indirect(&mut card, base + regs::SN_CR, SocketCommand::Open as u8);
    write_indirect(&mut card, base + regs::SN_DIPR, 192);
    write_indirect(&mut card, base + regs::SN_DIPR + 1, 168);
    write_indirect(&mut card, base + regs::SN_DIPR + 2, 64);
    write_indirect(&mut card, base + regs::SN_DIPR + 3, 1);
    write_indirect(&mut card, base + regs::SN_DPORT, (port >> 8) as u8);
    write_indirect(&mut card, base + regs::SN_DPORT + 1, (port & 0xff) as u8);
    write_indirect(&mut card, base + regs::SN_CR, SocketCommand::Connect as u8);

    let mut accepted = None;
    for _ in 0..200 {
        card.poll();
        if let Ok((stream, _)) = listener.accept() {
            accepted = Some(stream);
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert!(accepted.is_some(), "connect should have redirected to 127.0.0.1");
}

#[test]
fn virtual_arp_answers_for_the_gateway() {
    use uthernet2::w5100::virtual_net::eth::{EthHeader, ETHERTYPE_ARP};

    let mut card = Uthernet2::new();
    let base = regs::socket_base(0);
    write_indirect(&mut card, base + regs::SN_MR, 0x04); // MACRAW
    write_indirect(&mut card, base + regs::SN_CR, SocketCommand::Open as u8);

    let mut arp_request = Vec::new();
    EthHeader {
        dst: [0xff; 6],
        src: [0x02, 0, 0, 0, 0, 9],
        ethertype: ETHERTYPE_ARP,
    }
    .write(&mut arp_request);
    arp_request.extend_from_slice(&1u16.to_be_bytes()); // htype
    arp_request.extend_from_slice(&0x0800u16.to_be_bytes()); // ptype
    arp_request.push(6);
    arp_request.push(4);
    arp_request.extend_from_slice(&1u16.to_be_bytes()); // request
    arp_request.extend_from_slice(&[0x02, 0, 0, 0, 0, 9]);
    arp_request.extend_from_slice(&[192, 168, 65, 50]);
    arp_request.extend_from_slice(&[0; 6]);
    arp_request.extend_from_slice(&[192, 168, 65, 1]); // the virtual gateway

    let tx_base = regs::tx_base(0);
    let base0 = regs::socket_base(0);
    for (i, &b) in arp_request.iter().enumerate() {
        write_indirect(&mut card, tx_base + i as u16, b);
    }
    write_indirect(&mut card, base0 + regs::SN_TX_WR, (arp_request.len() >> 8) as u8);
    write_indirect(&mut card, base0 + regs::SN_TX_WR + 1, (arp_request.len() & 0xff) as u8);
    write_indirect(&mut card, base0 + regs::SN_CR, SocketCommand::Send as u8);
    card.poll(); // drains the staged reply into the guest-visible RX ring

    let rsr_hi = read_indirect(&mut card, base0 + regs::SN_RX_RSR);
    let rsr_lo = read_indirect(&mut card, base0 + regs::SN_RX_RSR + 1);
    let rsr = u16::from_be_bytes([rsr_hi, rsr_lo]);
    assert!(rsr > 0, "an ARP reply should have been staged");
}
