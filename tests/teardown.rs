//! Descriptor leak check for poller teardown.
//!
//! Kept to a single test so no other test in this process opens descriptors
//! while the count is taken.

use std::fs;
use std::net::UdpSocket;

use mmpoll::{EpollFlags, Poller};

fn open_fds() -> usize {
    fs::read_dir("/proc/self/fd").unwrap().count()
}

#[test]
fn test_destroy_closes_every_descriptor() {
    let before = open_fds();

    {
        let rx = UdpSocket::bind("127.0.0.1:0").unwrap();
        rx.set_nonblocking(true).unwrap();
        let tx = UdpSocket::bind("127.0.0.1:0").unwrap();
        tx.send_to(b"bye", rx.local_addr().unwrap()).unwrap();

        let mut poller = Poller::new(16, 8, 256).unwrap();
        assert!(open_fds() >= before + 4);

        poller.register(&rx, EpollFlags::EPOLLIN, 1).unwrap();
        poller.signal().unwrap();
        assert_eq!(poller.wait(1000).unwrap(), 2);
        assert_eq!(poller.receive_batch(&rx).unwrap(), 1);

        poller.destroy();
    }

    // rejected sizes leave nothing open behind
    assert!(Poller::new(16, 0, 256).is_err());

    assert_eq!(open_fds(), before);
}
