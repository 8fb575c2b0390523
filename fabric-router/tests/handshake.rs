// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::cell::Cell;
use std::rc::Rc;
use std::task::Poll;

use fabric_engine::run_simulation;
use fabric_engine::test_helpers::start_test;
use fabric_router::handshake::{LINK_ACK, LinkHandshake};
use fabric_router::memory::SystemMemory;
use fabric_router::transport::Memory;
use fabric_router::types::{LinkId, NodeId};

const MAILBOX: u32 = 0x100;
const SCRATCH: u32 = 0x110;

#[test]
fn lockstep_polls_establish_both_ends() {
    let engine = start_test(file!());
    let system = SystemMemory::new(engine.top(), engine.clock(), 2, 1024);
    system.connect(NodeId(0), LinkId(1), NodeId(1), LinkId(3));
    let mut port0 = system.port(NodeId(0));
    let mut port1 = system.port(NodeId(1));

    let mut near = LinkHandshake::new(engine.top(), LinkId(1), MAILBOX, SCRATCH, MAILBOX, None);
    let mut far = LinkHandshake::new(engine.top(), LinkId(3), MAILBOX, SCRATCH, MAILBOX, None);

    assert_eq!(near.poll(&mut port0), Poll::Pending);
    assert_eq!(far.poll(&mut port1), Poll::Pending);
    assert!(far.local_ready());
    assert!(!far.peer_ready());

    assert_eq!(near.poll(&mut port0), Poll::Ready(true));
    assert_eq!(port1.read_u32(MAILBOX), LINK_ACK);
    assert_eq!(far.poll(&mut port1), Poll::Ready(true));
    assert!(near.is_established() && far.is_established());
}

#[test]
fn both_ends_establish_in_simulation() {
    let mut engine = start_test(file!());
    let clock = engine.clock();
    let system = SystemMemory::new(engine.top(), clock.clone(), 2, 1024);
    system.connect(NodeId(0), LinkId(0), NodeId(1), LinkId(0));

    let results = Rc::new(Cell::new(0));
    for node in 0..2 {
        let mut port = system.port(NodeId(node));
        let mut handshake =
            LinkHandshake::new(engine.top(), LinkId(0), MAILBOX, SCRATCH, MAILBOX, Some(100));
        let clock = clock.clone();
        let results = results.clone();
        engine.spawn(async move {
            // Start the two ends at different times.
            clock.wait_cycles(u64::from(node) * 5).await;
            if handshake.establish(&mut port, &clock).await {
                results.set(results.get() + 1);
            }
            Ok(())
        });
    }
    run_simulation!(engine);
    assert_eq!(results.get(), 2);
}

#[test]
fn silent_peer_times_out() {
    let mut engine = start_test(file!());
    let clock = engine.clock();
    let system = SystemMemory::new(engine.top(), clock.clone(), 2, 1024);
    system.connect(NodeId(0), LinkId(0), NodeId(1), LinkId(0));

    let outcome = Rc::new(Cell::new(None));
    {
        let mut port = system.port(NodeId(0));
        let mut handshake =
            LinkHandshake::new(engine.top(), LinkId(0), MAILBOX, SCRATCH, MAILBOX, Some(1000));
        let clock = clock.clone();
        let outcome = outcome.clone();
        engine.spawn(async move {
            let established = handshake.establish(&mut port, &clock).await;
            outcome.set(Some((established, clock.now())));
            Ok(())
        });
    }
    run_simulation!(engine);

    let (established, cycle) = outcome.get().unwrap();
    assert!(!established);
    assert!(cycle >= 1000, "gave up at cycle {cycle}");
}

#[test]
fn without_timeout_poll_never_fails() {
    let engine = start_test(file!());
    let system = SystemMemory::new(engine.top(), engine.clock(), 2, 1024);
    system.connect(NodeId(0), LinkId(0), NodeId(1), LinkId(0));
    let mut port = system.port(NodeId(0));

    let mut handshake = LinkHandshake::new(engine.top(), LinkId(0), MAILBOX, SCRATCH, MAILBOX, None);
    for _ in 0..5000 {
        assert_eq!(handshake.poll(&mut port), Poll::Pending);
    }
    assert!(!handshake.local_ready());
}
