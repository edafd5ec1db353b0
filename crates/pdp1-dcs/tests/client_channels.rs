mod common;

use std::io::Write;
use std::net::TcpListener;

use common::{free_port, line, read_exact, Machine};
use pdp1_dcs::channel::{status, Requests};
use pdp1_dcs::error::cause;
use pdp1_dcs::Command;

// 127.0.0.1 split into the two 16-bit halves of a request block.
const LOOPBACK_HIGH: u32 = 0x7F00;
const LOOPBACK_LOW: u32 = 0x0001;

#[test]
fn client_channel_connects_out() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut m = Machine::new();
    let word0 =
        4 | line(2) | (Requests::INTERRUPT | Requests::ON_CONNECT | Requests::ON_READ).bits();
    assert_eq!(
        m.open(&[word0, u32::from(port), LOOPBACK_HIGH, LOOPBACK_LOW]),
        0
    );
    assert_eq!(
        m.status(4),
        status::OPEN | status::INTERRUPT_ENABLED
    );

    let (mut peer, _) = listener.accept().unwrap();
    m.wait_for_status(4, status::CONNECTED);
    assert_eq!(m.cpu.breaks, vec![2]);
    assert_eq!(m.status(4) & status::SERVER, 0);

    peer.write_all(b"ok").unwrap();
    m.wait_for("channel 4 to become current", |m| {
        m.exec(Command::Rrc, 0) == 4
    });
    assert_eq!(m.exec(Command::Rch, 0), u32::from(b'o'));
    assert_eq!(m.exec(Command::Rch, 0), u32::from(b'k'));

    assert_eq!(m.exec(Command::Tcc, u32::from(b'!')), 0);
    assert_eq!(read_exact(&mut peer, 1), b"!");
}

#[test]
fn refused_connection_is_a_socket_error() {
    let port = free_port();
    let mut m = Machine::new();

    let io = m.open(&[1, u32::from(port), LOOPBACK_HIGH, LOOPBACK_LOW]);
    if io == 0 {
        m.wait_for_status(1, 0o40);
        assert_eq!(m.status(1) & status::CONNECTED, 0);
    }
    assert_eq!(m.exec(Command::Rle, 0) & 0o17, cause::SOCKET);
}
