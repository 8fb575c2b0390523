// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use fabric_engine::run_simulation;
use fabric_engine::test_helpers::start_test;
use fabric_router::memory::SystemMemory;
use fabric_router::packet::{Command, PacketHeader};
use fabric_router::pull_request::{ChannelRequest, PendingEnqueue, PullRequest, PullRequestQueue};
use fabric_router::types::NodeId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn request(id: u32) -> ChannelRequest {
    ChannelRequest::Pull(PullRequest {
        size_bytes: id,
        ..PullRequest::default()
    })
}

fn id_of(request: ChannelRequest) -> u32 {
    match request {
        ChannelRequest::Pull(pull) => pull.size_bytes,
        ChannelRequest::Inline(_) => panic!("unexpected inline request"),
    }
}

#[test]
fn full_queue_holds_back_late_senders() {
    let engine = start_test(file!());
    let system = SystemMemory::new(engine.top(), engine.clock(), 2, 4096);
    let mut sender = system.port(NodeId(0));
    let mut owner = system.port(NodeId(1));

    let mut queue = PullRequestQueue::new(0x100, 4);
    queue.init(&mut owner);
    let handle = queue.handle(&owner);

    let pending: Vec<PendingEnqueue> = (0..6)
        .map(|id| handle.begin_enqueue(&mut sender, request(id)))
        .collect();
    let ready: Vec<bool> = pending.iter().map(|p| p.poll(&mut sender).is_ready()).collect();
    assert_eq!(ready, vec![true, true, true, true, false, false]);
    assert_eq!(handle.occupied(&sender), 6);

    let head = queue.peek(&owner).unwrap().unwrap();
    assert_eq!(id_of(head), 0);
    queue.complete(&mut owner);

    assert!(pending[4].poll(&mut sender).is_ready());
    assert!(pending[5].poll(&mut sender).is_pending());
    assert_eq!(queue.occupied(&owner), 5);
}

#[test]
fn waiting_senders_never_overwrite_the_head() {
    let engine = start_test(file!());
    let system = SystemMemory::new(engine.top(), engine.clock(), 2, 4096);
    let mut sender = system.port(NodeId(0));
    let mut owner = system.port(NodeId(1));

    let mut queue = PullRequestQueue::new(0x100, 1);
    queue.init(&mut owner);
    let handle = queue.handle(&owner);

    // Many more senders than slots wait at once.
    let pending: Vec<PendingEnqueue> = (100..105)
        .map(|id| handle.begin_enqueue(&mut sender, request(id)))
        .collect();
    let ready: Vec<bool> = pending.iter().map(|p| p.poll(&mut sender).is_ready()).collect();
    assert_eq!(ready, vec![true, false, false, false, false]);
    assert_eq!(handle.occupied(&sender), 5);
    assert_eq!(id_of(queue.peek(&owner).unwrap().unwrap()), 100);

    for id in 101..105 {
        queue.complete(&mut owner);
        let waiting = &pending[(id - 100) as usize..];
        let ready: Vec<bool> = waiting.iter().map(|p| p.poll(&mut sender).is_ready()).collect();
        assert!(ready[0]);
        assert!(ready[1..].iter().all(|r| !r), "{ready:?} after completing {}", id - 1);
        assert_eq!(id_of(queue.peek(&owner).unwrap().unwrap()), id);
    }
    queue.complete(&mut owner);
    assert_eq!(queue.peek(&owner), None);
    assert_eq!(queue.occupied(&owner), 0);
}

#[test]
fn credits_are_conserved() {
    let engine = start_test(file!());
    let system = SystemMemory::new(engine.top(), engine.clock(), 2, 4096);
    let mut sender = system.port(NodeId(0));
    let mut owner = system.port(NodeId(1));

    let num_slots = 8;
    let mut queue = PullRequestQueue::new(0x200, num_slots);
    queue.init(&mut owner);
    let handle = queue.handle(&owner);

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut waiting: VecDeque<PendingEnqueue> = VecDeque::new();
    let mut written: VecDeque<u32> = VecDeque::new();
    let mut next_id = 0;
    let mut completed = 0;

    for _ in 0..2000 {
        if rng.gen_bool(0.55) && waiting.len() + written.len() < 4 * num_slots as usize {
            waiting.push_back(handle.begin_enqueue(&mut sender, request(next_id)));
            next_id += 1;
        } else if let Some(head) = queue.peek(&owner) {
            assert_eq!(id_of(head.unwrap()), written.pop_front().unwrap());
            queue.complete(&mut owner);
            completed += 1;
        }

        // Senders retry in ticket order.
        while let Some(front) = waiting.front() {
            if front.poll(&mut sender).is_pending() {
                break;
            }
            written.push_back(id_of(*front.request()));
            waiting.pop_front();
        }

        assert!(written.len() <= num_slots as usize);
        assert_eq!(handle.occupied(&sender) as usize, waiting.len() + written.len());
        assert_eq!(next_id - completed, (waiting.len() + written.len()) as u32);
    }
    assert!(completed > 100);
}

#[test]
fn enqueue_waits_for_drain() {
    let mut engine = start_test(file!());
    let clock = engine.clock();
    let system = SystemMemory::new(engine.top(), clock.clone(), 2, 4096);
    let mut sender = system.port(NodeId(0));
    let mut owner = system.port(NodeId(1));

    let mut queue = PullRequestQueue::new(0x100, 2);
    queue.init(&mut owner);
    let handle = queue.handle(&owner);
    for id in 0..2 {
        assert!(handle.begin_enqueue(&mut sender, request(id)).poll(&mut sender).is_ready());
    }

    let enqueued_at = Rc::new(Cell::new(None));
    {
        let clock = clock.clone();
        let enqueued_at = enqueued_at.clone();
        engine.spawn(async move {
            handle.enqueue(&mut sender, &clock, request(2)).await;
            enqueued_at.set(Some(clock.now()));
            Ok(())
        });
    }
    {
        let clock = clock.clone();
        engine.spawn(async move {
            clock.wait_cycles(10).await;
            queue.complete(&mut owner);
            Ok(())
        });
    }
    run_simulation!(engine);

    let cycle = enqueued_at.get().unwrap();
    assert!(cycle >= 10, "enqueued at cycle {cycle}");
    assert_eq!(handle.occupied(&system.port(NodeId(0))), 2);
}

#[test]
fn inline_requests_carry_their_header() {
    let engine = start_test(file!());
    let system = SystemMemory::new(engine.top(), engine.clock(), 2, 4096);
    let mut sender = system.port(NodeId(0));
    let mut owner = system.port(NodeId(1));

    let mut queue = PullRequestQueue::new(0x100, 2);
    queue.init(&mut owner);
    let handle = queue.handle(&owner);

    let header = PacketHeader::new(Command::AsyncWrite, 0, 1).set_atomic(1, 31);
    let pending = handle.begin_enqueue(&mut sender, ChannelRequest::Inline(header));
    assert!(pending.poll(&mut sender).is_ready());

    assert_eq!(queue.peek(&owner), Some(Ok(ChannelRequest::Inline(header))));
    queue.complete(&mut owner);
    assert_eq!(queue.peek(&owner), None);
}
