use rand::{prelude::random, rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use rayon::prelude::*;

use std::sync::Mutex;

use super::*;

use crate::frame::StreamItem;
use crate::Post;

fn topic(name: &str) -> BrokerTopic {
    BrokerTopic::new("test", TopicName::try_from(name).unwrap())
}

fn info(id: PostID) -> PostInfo {
    PostInfo { id, poster: "alice".to_string(), extension: "txt".to_string() }
}

fn packet(id: PostID, is_final: bool, b: u8) -> Packet {
    Packet { post_id: id, is_final, payload: vec![b] }
}

#[derive(Default)]
struct Recorder {
    items: Mutex<Vec<StreamItem>>,
}

impl Subscriber for Recorder {
    fn on_post_info(&self, _: &TopicName, info: &PostInfo) -> Result<()> {
        self.items.lock().unwrap().push(StreamItem::PostInfo(info.clone()));
        Ok(())
    }

    fn on_packet(&self, _: &TopicName, packet: &Packet) -> Result<()> {
        self.items.lock().unwrap().push(StreamItem::Packet(packet.clone()));
        Ok(())
    }
}

struct Broken;

impl Subscriber for Broken {
    fn on_post_info(&self, _: &TopicName, _: &PostInfo) -> Result<()> {
        err!(Disconnected, desc: "broken")
    }

    fn on_packet(&self, _: &TopicName, _: &Packet) -> Result<()> {
        err!(Disconnected, desc: "broken")
    }
}

#[test]
fn test_topic_empty() {
    let t = topic("empty");
    assert!(t.is_empty());
    assert_eq!(t.last_completed_id(), FETCH_ALL_POSTS);
    assert_eq!(t.posts_since(FETCH_ALL_POSTS).unwrap().len(), 0);
    assert_eq!(t.posts_since(10).unwrap_err().kind(), ErrorKind::PostNotFound);
}

#[test]
fn test_topic_interleaved() {
    let t = topic("interleaved");

    t.append_post_info(info(1)).unwrap();
    t.append_post_info(info(2)).unwrap();
    t.append_packet(packet(2, true, 20)).unwrap();
    t.append_packet(packet(1, false, 10)).unwrap();
    t.append_post_info(info(3)).unwrap();

    // post-1 is in flight, post-2 complete, post-3 in flight.
    assert_eq!(t.last_completed_id(), 2);
    let posts = t.posts_since(FETCH_ALL_POSTS).unwrap();
    assert_eq!(posts, vec![(info(2), vec![packet(2, true, 20)])]);

    t.append_packet(packet(1, true, 11)).unwrap();
    assert_eq!(t.last_completed_id(), 2);
    let ids: Vec<PostID> =
        t.posts_since(FETCH_ALL_POSTS).unwrap().iter().map(|(i, _)| i.id).collect();
    assert_eq!(ids, vec![1, 2]);
    let ids: Vec<PostID> = t.posts_since(1).unwrap().iter().map(|(i, _)| i.id).collect();
    assert_eq!(ids, vec![2]);
    assert_eq!(t.posts_since(2).unwrap().len(), 0);
    // cursor can point to an in-flight post.
    assert_eq!(t.posts_since(3).unwrap().len(), 0);

    t.append_packet(packet(3, true, 30)).unwrap();
    assert_eq!(t.last_completed_id(), 3);
    assert_eq!(t.len(), 3);
}

#[test]
fn test_topic_invalid_appends() {
    let t = topic("invalid");

    t.append_post_info(info(1)).unwrap();
    let err = t.append_post_info(info(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PostExists);

    let err = t.append_packet(packet(2, false, 0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PostNotFound);

    t.append_packet(packet(1, true, 0)).unwrap();
    let err = t.append_packet(packet(1, true, 0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolError);

    assert_eq!(t.len(), 1);
    assert_eq!(t.posts_since(FETCH_ALL_POSTS).unwrap()[0].1.len(), 1);
}

#[test]
fn test_topic_notify() {
    let t = topic("notify");
    let rec = Arc::new(Recorder::default());
    let id = t.subscribe(Arc::clone(&rec) as Arc<dyn Subscriber>);
    let broken = t.subscribe(Arc::new(Broken));
    assert_eq!(t.num_subscribers(), 2);

    t.append_post_info(info(1)).unwrap();
    // failing subscriber is dropped, appends don't fail.
    assert_eq!(t.num_subscribers(), 1);
    assert!(!t.unsubscribe(broken));

    t.append_packet(packet(1, true, 1)).unwrap();
    assert!(t.unsubscribe(id));
    t.append_post_info(info(2)).unwrap();

    let items = rec.items.lock().unwrap().clone();
    assert_eq!(
        items,
        vec![StreamItem::PostInfo(info(1)), StreamItem::Packet(packet(1, true, 1))]
    );
}

#[test]
fn test_topic_subscribe_since() {
    let t = topic("since");

    t.append_post_info(info(1)).unwrap();
    t.append_packet(packet(1, true, 1)).unwrap();
    t.append_post_info(info(2)).unwrap();
    t.append_packet(packet(2, false, 2)).unwrap();
    t.append_post_info(info(3)).unwrap();
    t.append_packet(packet(3, true, 3)).unwrap();

    let rec = Arc::new(Recorder::default());
    let (_, backfill) = t.subscribe_since(1, Arc::clone(&rec) as Arc<dyn Subscriber>).unwrap();
    assert!(backfill.is_empty());

    // post-2 is in-flight, it and every post after it are replayed into the
    // subscriber in arrival order.
    t.append_packet(packet(2, true, 2)).unwrap();
    let items = rec.items.lock().unwrap().clone();
    assert_eq!(
        items,
        vec![
            StreamItem::PostInfo(info(2)),
            StreamItem::Packet(packet(2, false, 2)),
            StreamItem::PostInfo(info(3)),
            StreamItem::Packet(packet(3, true, 3)),
            StreamItem::Packet(packet(2, true, 2)),
        ]
    );

    // completed posts ahead of the first in-flight post go out as backfill.
    t.append_post_info(info(4)).unwrap();
    let rec = Arc::new(Recorder::default());
    let (_, backfill) =
        t.subscribe_since(FETCH_ALL_POSTS, Arc::clone(&rec) as Arc<dyn Subscriber>).unwrap();
    let ids: Vec<PostID> = backfill.iter().map(|(i, _)| i.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(rec.items.lock().unwrap().clone(), vec![StreamItem::PostInfo(info(4))]);

    let rec = Arc::new(Recorder::default());
    let err = t.subscribe_since(99, rec).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PostNotFound);
    assert_eq!(t.num_subscribers(), 2);
}

// Append a random set of posts, packets interleaved across posts at random, and
// check that completed posts are reported in post-info order.
#[test]
fn test_topic_random_interleave() {
    let seed = random();
    println!("test_topic_random_interleave seed:{}", seed);
    let mut rng = StdRng::seed_from_u64(seed);

    for _i in 0..100 {
        let t = topic("random");
        let n_posts = rng.gen_range(1..20);

        let mut pending: Vec<(PostID, Vec<Packet>)> = Vec::default();
        let mut order = vec![];
        for id in 0..n_posts {
            let data: Vec<u8> = (0..rng.gen_range(0..64)).map(|_| rng.gen()).collect();
            let post = Post::new(info(id), data);
            pending.push((id, post.to_packets(rng.gen_range(1..16))));
        }

        // post-infos are appended in a random order, but ahead of their packets.
        pending.shuffle(&mut rng);
        for (id, _) in pending.iter() {
            t.append_post_info(info(*id)).unwrap();
            order.push(*id);
        }

        let mut completed = vec![];
        while !pending.is_empty() {
            let off = rng.gen_range(0..pending.len());
            let packet = pending[off].1.remove(0);
            if packet.is_final {
                completed.push(packet.post_id);
            }
            t.append_packet(packet).unwrap();
            if pending[off].1.is_empty() {
                pending.remove(off);
            }

            let ids: Vec<PostID> =
                t.posts_since(FETCH_ALL_POSTS).unwrap().iter().map(|(i, _)| i.id).collect();
            let expect: Vec<PostID> =
                order.iter().filter(|id| completed.contains(id)).cloned().collect();
            assert_eq!(ids, expect);

            let last = order.iter().rev().find(|id| completed.contains(id));
            assert_eq!(t.last_completed_id(), last.cloned().unwrap_or(FETCH_ALL_POSTS));
        }
    }
}

#[test]
fn test_topic_concurrent_appends() {
    let t = topic("concurrent");
    let n_posts = 256_i64;

    (0..n_posts).into_par_iter().for_each(|id| {
        let post = Post::new(info(id), vec![id as u8; 100]);
        t.append_post_info(post.info.clone()).unwrap();
        for packet in post.to_packets(7).into_iter() {
            t.append_packet(packet).unwrap();
        }
    });

    let posts = t.posts_since(FETCH_ALL_POSTS).unwrap();
    assert_eq!(posts.len(), n_posts as usize);
    for (info, packets) in posts.into_iter() {
        let post = Post::from_packets(info.clone(), &packets).unwrap();
        assert_eq!(post.data, vec![info.id as u8; 100]);
    }
}
