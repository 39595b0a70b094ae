use rand::{prelude::random, rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use std::sync::Arc;
use std::thread;

use super::*;

use crate::{BrokerTopic, Post, PostSink, UserTopic, FETCH_ALL_POSTS, MAX_FRAME_SIZE};

fn info(id: PostID) -> PostInfo {
    PostInfo { id, poster: "bob".to_string(), extension: "txt".to_string() }
}

fn packet(id: PostID, is_final: bool, b: u8) -> Packet {
    Packet { post_id: id, is_final, payload: vec![b] }
}

fn new_topic() -> BrokerTopic {
    BrokerTopic::new("test", TopicName::try_from("fanout").unwrap())
}

#[test]
fn test_fanout_completion_order() {
    let topic = new_topic();
    let (fanout, transmitter) = FanOut::new("test");
    let fanout = Arc::new(fanout);
    topic.subscribe(Arc::clone(&fanout) as Arc<dyn Subscriber>);

    topic.append_post_info(info(1)).unwrap();
    topic.append_post_info(info(2)).unwrap();
    topic.append_packet(packet(2, true, 0x2A)).unwrap();
    topic.append_packet(packet(1, false, 0x1A)).unwrap();
    topic.append_packet(packet(1, true, 0x1B)).unwrap();

    let items: Vec<StreamItem> = transmitter.rx.try_iter().collect();
    assert_eq!(
        items,
        vec![
            StreamItem::PostInfo(info(1)),
            StreamItem::Packet(packet(1, false, 0x1A)),
            StreamItem::Packet(packet(1, true, 0x1B)),
            StreamItem::PostInfo(info(2)),
            StreamItem::Packet(packet(2, true, 0x2A)),
        ]
    );
    assert_eq!(fanout.to_current(), None);
    assert_eq!(fanout.num_pending(), 0);
}

// Apply backfill and queued items to a client side topic, as a subscriber
// connection would.
fn deliver(user: &UserTopic, backfill: Vec<(PostInfo, Vec<Packet>)>, transmitter: &Transmitter) {
    for (info, packets) in backfill.into_iter() {
        user.post_info(info).unwrap();
        for packet in packets.into_iter() {
            user.packet(packet).unwrap();
        }
    }
    for item in transmitter.rx.try_iter() {
        match item {
            StreamItem::PostInfo(info) => user.post_info(info).unwrap(),
            StreamItem::Packet(packet) => user.packet(packet).unwrap(),
        }
    }
}

fn to_ids(user: &UserTopic) -> Vec<PostID> {
    user.posts_since(FETCH_ALL_POSTS).unwrap().iter().map(|p| p.info.id).collect()
}

#[test]
fn test_fanout_resume_after_interleave() {
    let topic = new_topic();
    topic.append_post_info(info(1)).unwrap();
    topic.append_post_info(info(2)).unwrap();
    topic.append_packet(packet(2, true, 2)).unwrap();

    let user = UserTopic::new(TopicName::try_from("fanout").unwrap());
    let (fanout, transmitter) = FanOut::new("test");
    let (sub_id, backfill) =
        topic.subscribe_since(user.last_completed_id(), Arc::new(fanout)).unwrap();
    assert!(backfill.is_empty());
    topic.append_packet(packet(1, true, 1)).unwrap();
    deliver(&user, backfill, &transmitter);

    assert_eq!(to_ids(&user), vec![1, 2]);
    assert_eq!(user.last_completed_id(), 2);
    assert!(topic.unsubscribe(sub_id));

    // resume from the subscriber's cursor, nothing is delivered twice.
    topic.append_post_info(info(3)).unwrap();
    topic.append_packet(packet(3, true, 3)).unwrap();
    let (fanout, transmitter) = FanOut::new("test");
    let (_, backfill) =
        topic.subscribe_since(user.last_completed_id(), Arc::new(fanout)).unwrap();
    deliver(&user, backfill, &transmitter);

    assert_eq!(to_ids(&user), vec![1, 2, 3]);
}

#[test]
fn test_fanout_chained_completion() {
    let topic = new_topic();
    let (fanout, transmitter) = FanOut::new("test");
    let fanout = Arc::new(fanout);
    topic.subscribe(Arc::clone(&fanout) as Arc<dyn Subscriber>);

    for id in 1..=4 {
        topic.append_post_info(info(id)).unwrap();
    }
    topic.append_packet(packet(3, true, 3)).unwrap();
    topic.append_packet(packet(2, true, 2)).unwrap();
    topic.append_packet(packet(4, false, 4)).unwrap();
    assert_eq!(fanout.to_current(), Some(1));
    assert_eq!(fanout.num_pending(), 3);

    // completing post-1 streams post-2 and post-3, and stops at in-flight post-4.
    topic.append_packet(packet(1, true, 1)).unwrap();
    assert_eq!(fanout.to_current(), Some(4));
    assert_eq!(fanout.num_pending(), 0);

    topic.append_packet(packet(4, true, 5)).unwrap();
    assert_eq!(fanout.to_current(), None);

    let items: Vec<StreamItem> = transmitter.rx.try_iter().collect();
    assert_eq!(
        items,
        vec![
            StreamItem::PostInfo(info(1)),
            StreamItem::Packet(packet(1, true, 1)),
            StreamItem::PostInfo(info(2)),
            StreamItem::Packet(packet(2, true, 2)),
            StreamItem::PostInfo(info(3)),
            StreamItem::Packet(packet(3, true, 3)),
            StreamItem::PostInfo(info(4)),
            StreamItem::Packet(packet(4, false, 4)),
            StreamItem::Packet(packet(4, true, 5)),
        ]
    );
}

#[test]
fn test_fanout_unknown_packet() {
    let (fanout, _transmitter) = FanOut::new("test");
    let name = TopicName::try_from("fanout").unwrap();

    fanout.on_post_info(&name, &info(1)).unwrap();
    let err = fanout.on_packet(&name, &packet(2, true, 0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolError);
}

#[test]
fn test_fanout_transmitter_gone() {
    let topic = new_topic();
    let (fanout, transmitter) = FanOut::new("test");
    topic.subscribe(Arc::new(fanout));
    std::mem::drop(transmitter);

    // append succeeds, and the fan-out is removed from the topic.
    topic.append_post_info(info(1)).unwrap();
    assert_eq!(topic.num_subscribers(), 0);
}

#[test]
fn test_fanout_random() {
    let seed = random();
    println!("test_fanout_random seed:{}", seed);
    let mut rng = StdRng::seed_from_u64(seed);

    for _i in 0..100 {
        let topic = new_topic();
        let (fanout, transmitter) = FanOut::new("test");
        topic.subscribe(Arc::new(fanout));

        // post-infos are appended as they show up, packets interleave at random.
        let n_posts = rng.gen_range(1..16);
        let mut posts: Vec<(PostInfo, Vec<Packet>)> = (0..n_posts)
            .map(|id| {
                let data: Vec<u8> = (0..rng.gen_range(0..32)).map(|_| rng.gen()).collect();
                let post = Post::new(info(id), data);
                let packets = post.to_packets(rng.gen_range(1..8));
                (post.info, packets)
            })
            .collect();
        posts.shuffle(&mut rng);

        let mut order = vec![];
        let mut started: Vec<usize> = vec![];
        let mut next = 0;
        while next < posts.len() || !started.is_empty() {
            if next < posts.len() && (started.is_empty() || rng.gen::<bool>()) {
                topic.append_post_info(posts[next].0.clone()).unwrap();
                order.push(posts[next].0.id);
                started.push(next);
                next += 1;
            } else {
                let off = rng.gen_range(0..started.len());
                let packet = posts[started[off]].1.remove(0);
                topic.append_packet(packet).unwrap();
                if posts[started[off]].1.is_empty() {
                    started.remove(off);
                }
            }
        }

        // every post streams contiguously, in post-info order.
        let items: Vec<StreamItem> = transmitter.rx.try_iter().collect();
        let mut iter = items.into_iter();
        for id in order.into_iter() {
            match iter.next() {
                Some(StreamItem::PostInfo(info)) => assert_eq!(info.id, id),
                item => panic!("expected post-info {} got {:?}", id, item),
            }
            loop {
                match iter.next() {
                    Some(StreamItem::Packet(p)) if p.post_id == id && p.is_final => break,
                    Some(StreamItem::Packet(p)) if p.post_id == id => (),
                    item => panic!("expected packet for {} got {:?}", id, item),
                }
            }
        }
        assert!(iter.next().is_none());
    }
}

#[test]
fn test_transmitter_connection() {
    let server = net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap();

    let topic = Arc::new(new_topic());
    let (fanout, transmitter) = FanOut::new("test");
    let fanout_id = topic.subscribe(Arc::new(fanout));

    let handle = thread::spawn(move || {
        let (conn, _) = server.accept().unwrap();
        transmitter.run(&conn, time::Duration::from_millis(10))
    });

    let mut client = net::TcpStream::connect(addr).unwrap();
    topic.append_post_info(info(7)).unwrap();
    topic.append_packet(packet(7, true, 7)).unwrap();

    let item: StreamItem = frame::recv(&mut client, MAX_FRAME_SIZE).unwrap();
    assert_eq!(item, StreamItem::PostInfo(info(7)));
    let item: StreamItem = frame::recv(&mut client, MAX_FRAME_SIZE).unwrap();
    assert_eq!(item, StreamItem::Packet(packet(7, true, 7)));

    // dropping the fan-out ends the transmitter cleanly.
    assert!(topic.unsubscribe(fanout_id));
    assert_eq!(handle.join().unwrap().unwrap(), 2);
}

#[test]
fn test_transmitter_subscriber_closed() {
    let server = net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap();

    let (fanout, transmitter) = FanOut::new("test");
    let handle = thread::spawn(move || {
        let (conn, _) = server.accept().unwrap();
        transmitter.run(&conn, time::Duration::from_millis(10))
    });

    let client = net::TcpStream::connect(addr).unwrap();
    std::mem::drop(client);

    let err = handle.join().unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Disconnected);
    std::mem::drop(fanout);
}
