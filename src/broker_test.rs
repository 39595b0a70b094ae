use rand::{prelude::random, rngs::StdRng, Rng, SeedableRng};

use std::io::Read;
use std::{sync::Arc, thread, time};

use super::*;

use crate::client::Client;
use crate::{Post, PostInfo, PostSink, UserTopic, FETCH_ALL_POSTS, SLEEP_10MS};

fn config(name: &str) -> Config {
    Config {
        name: name.to_string(),
        bind_ip: "127.0.0.1".parse().unwrap(),
        fanout_idle_timeout: 20,
        ..Config::default()
    }
}

fn spawn_broker(name: &str) -> Broker {
    Broker::from_config(config(name)).unwrap().spawn().unwrap()
}

fn client_for(broker: &Broker) -> Client {
    let mut client = Client::new(broker.client_address().unwrap().addr);
    client.set_packet_size(100);
    client
}

fn topic_name(s: &str) -> TopicName {
    TopicName::try_from(s).unwrap()
}

fn new_post(rng: &mut StdRng, poster: &str) -> Post {
    let data: Vec<u8> = (0..rng.gen_range(0..1000)).map(|_| rng.gen()).collect();
    Post::new(PostInfo::new(poster, "bin"), data)
}

fn wait_until<F: Fn() -> bool>(what: &str, f: F) {
    for _i in 0..1000 {
        if f() {
            return;
        }
        thread::sleep(SLEEP_10MS);
    }
    panic!("timeout waiting for {}", what);
}

#[test]
fn test_broker_topic_lifecycle() {
    let seed = random();
    println!("test_broker_topic_lifecycle seed:{}", seed);
    let mut rng = StdRng::seed_from_u64(seed);

    let broker = spawn_broker("lifecycle");
    let client = client_for(&broker);
    let name = topic_name("news");
    let post = new_post(&mut rng, "alice");

    assert!(!client.publish(&name, &[post.clone()]).unwrap());
    assert!(!client.delete_topic(&name).unwrap());
    assert!(client.create_topic(&name).unwrap());
    assert!(!client.create_topic(&name).unwrap());

    assert!(client.publish(&name, &[post.clone()]).unwrap());
    let topic = broker.as_registry().unwrap().get(&name).unwrap();
    assert_eq!(topic.last_completed_id(), post.info.id);

    // stream with a duplicate post is applied up to the duplicate.
    let fresh = new_post(&mut rng, "bob");
    assert!(!client.publish(&name, &[fresh.clone(), post.clone()]).unwrap());
    assert_eq!(topic.len(), 2);
    assert_eq!(topic.last_completed_id(), fresh.info.id);

    // create, delete, create leaves no residue.
    assert!(client.delete_topic(&name).unwrap());
    assert!(!client.delete_topic(&name).unwrap());
    assert!(client.create_topic(&name).unwrap());
    let topic = broker.as_registry().unwrap().get(&name).unwrap();
    assert!(topic.is_empty());

    broker.close_wait().unwrap();
}

#[test]
fn test_broker_publish_subscribe() {
    let seed = random();
    println!("test_broker_publish_subscribe seed:{}", seed);
    let mut rng = StdRng::seed_from_u64(seed);

    let broker = spawn_broker("pubsub");
    let client = client_for(&broker);
    let name = topic_name("pubsub");
    assert!(client.create_topic(&name).unwrap());

    let (p1, p2, p3) = (new_post(&mut rng, "a"), new_post(&mut rng, "b"), new_post(&mut rng, "c"));
    assert!(client.publish(&name, &[p1.clone(), p2.clone()]).unwrap());

    // backfill, then live posts.
    let sub = client.subscribe(Arc::new(UserTopic::new(name.clone()))).unwrap().unwrap();
    wait_until("backfill", || sub.as_topic().len() == 2);
    assert!(client.publish(&name, &[p3.clone()]).unwrap());
    wait_until("live post", || sub.as_topic().len() == 3);
    assert_eq!(sub.as_topic().pull(), vec![p1.clone(), p2.clone(), p3.clone()]);

    let outcome = sub.close().unwrap();
    assert!(outcome.is_peer_closed(), "{}", outcome);
    assert_eq!(outcome.posts, 3);

    // resume after p2.
    let topic = Arc::new(UserTopic::from_posts(name.clone(), vec![p1.clone(), p2.clone()]));
    let sub = client.subscribe(Arc::clone(&topic)).unwrap().unwrap();
    wait_until("resume", || topic.len() == 3);
    assert_eq!(topic.posts_since(p2.info.id).unwrap(), vec![p3.clone()]);
    sub.close();

    // unknown cursor and unknown topic are rejected.
    let unknown = new_post(&mut rng, "d");
    let topic = Arc::new(UserTopic::from_posts(name.clone(), vec![unknown]));
    assert!(client.subscribe(topic).unwrap().is_none());
    let topic = Arc::new(UserTopic::new(topic_name("missing")));
    assert!(client.subscribe(topic).unwrap().is_none());

    // subscribers go away on their own.
    wait_until("consumers", || broker.as_registry().unwrap().num_consumers(&name) == 0);
    let topic = broker.as_registry().unwrap().get(&name).unwrap();
    wait_until("fan-outs", || topic.num_subscribers() == 1);

    broker.close_wait().unwrap();
}

#[test]
fn test_broker_concurrent_publish() {
    let seed: u64 = random();
    println!("test_broker_concurrent_publish seed:{}", seed);

    let broker = spawn_broker("concurrent");
    let client = client_for(&broker);
    let name = topic_name("busy");
    assert!(client.create_topic(&name).unwrap());

    let sub = client.subscribe(Arc::new(UserTopic::new(name.clone()))).unwrap().unwrap();

    let handles: Vec<thread::JoinHandle<Vec<Post>>> = (0..4_u64)
        .map(|i| {
            let (client, name) = (client.clone(), name.clone());
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i));
                let posts: Vec<Post> = (0..5).map(|_| new_post(&mut rng, "writer")).collect();
                for chunk in posts.chunks(2) {
                    assert!(client.publish(&name, chunk).unwrap());
                }
                posts
            })
        })
        .collect();
    let mut published: Vec<Post> =
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect();

    wait_until("all posts", || sub.as_topic().len() == 20);

    // subscriber sees posts in the broker's order.
    let topic = broker.as_registry().unwrap().get(&name).unwrap();
    let ordered: Vec<Post> = topic
        .posts_since(FETCH_ALL_POSTS)
        .unwrap()
        .into_iter()
        .map(|(info, packets)| Post::from_packets(info, &packets).unwrap())
        .collect();
    let mut received = sub.as_topic().posts_since(FETCH_ALL_POSTS).unwrap();
    assert_eq!(received, ordered);

    received.sort_by_key(|p| p.info.id);
    published.sort_by_key(|p| p.info.id);
    assert_eq!(received, published);

    sub.close();
    broker.close_wait().unwrap();
}

#[test]
fn test_broker_delete_closes_subscribers() {
    let broker = spawn_broker("delete");
    let client = client_for(&broker);
    let name = topic_name("short-lived");
    assert!(client.create_topic(&name).unwrap());

    let sub = client.subscribe(Arc::new(UserTopic::new(name.clone()))).unwrap().unwrap();
    wait_until("consumer", || broker.as_registry().unwrap().num_consumers(&name) == 1);
    assert!(client.delete_topic(&name).unwrap());

    let outcome = sub.wait().unwrap();
    assert!(outcome.is_peer_closed(), "{}", outcome);
    assert_eq!(outcome.posts, 0);

    broker.close_wait().unwrap();
}

#[test]
fn test_broker_rehydrate() {
    let seed = random();
    println!("test_broker_rehydrate seed:{}", seed);
    let mut rng = StdRng::seed_from_u64(seed);

    let dao = MemoryDao::default();
    let name = topic_name("durable");
    let posts: Vec<Post> = (0..4).map(|_| new_post(&mut rng, "alice")).collect();

    let broker = Broker::from_config(config("first")).unwrap();
    let broker = broker.spawn_with_dao(dao.clone()).unwrap();
    let client = client_for(&broker);
    assert!(client.create_topic(&name).unwrap());
    assert!(client.publish(&name, &posts).unwrap());
    broker.close_wait().unwrap();

    let broker = Broker::from_config(config("second")).unwrap();
    let broker = broker.spawn_with_dao(dao).unwrap();
    let client = client_for(&broker);
    assert!(!client.create_topic(&name).unwrap());

    let sub = client.subscribe(Arc::new(UserTopic::new(name.clone()))).unwrap().unwrap();
    wait_until("rehydrated posts", || sub.as_topic().len() == 4);
    assert_eq!(sub.as_topic().pull(), posts);
    sub.close();

    broker.close_wait().unwrap();
}

#[test]
fn test_broker_discovery() {
    let leader = spawn_broker("leader");
    let leader_addr = leader.broker_address().unwrap();

    let followers: Vec<Broker> = (0..2)
        .map(|i| {
            let mut config = config(&format!("follower-{}", i));
            config.leader = Some(leader_addr);
            Broker::from_config(config).unwrap().spawn().unwrap()
        })
        .collect();
    wait_until("peers", || leader.to_peers().len() == 2);

    let own = leader.client_address().unwrap();
    let peers = leader.to_peers();
    for follower in followers.iter() {
        assert!(peers.contains(&follower.client_address().unwrap()));
    }

    let client = client_for(&leader);
    let mut owners = vec![];
    for i in 0..50 {
        let name = topic_name(&format!("topic-{}", i));
        let owner = client.discover(&name).unwrap();
        assert_eq!(owner, discovery::assigned_broker(&name, own, &peers));
        assert_eq!(client.discover(&name).unwrap(), owner);
        owners.push(owner);
    }
    assert!(owners.iter().any(|o| *o != own));

    // topics are served by their owners.
    let name = topic_name("owned");
    let owner = client.to_owner(&name).unwrap();
    assert!(owner.create_topic(&name).unwrap());
    assert!(owner.publish(&name, &[Post::new(PostInfo::new("bob", "txt"), vec![1])]).unwrap());

    for follower in followers.into_iter() {
        follower.close_wait().unwrap();
    }
    leader.close_wait().unwrap();
}

#[test]
fn test_broker_rejects_peer_handshake_from_client() {
    let broker = spawn_broker("strict");
    let addr = broker.client_address().unwrap();

    let conn = net::TcpStream::connect(addr.addr).unwrap();
    let mut w = io::BufWriter::new(&conn);
    frame::send(&mut w, &Message::PeerHandshake(addr)).unwrap();
    frame::flush(&mut w).unwrap();
    mem::drop(w);

    let err = frame::recv::<_, bool>(&mut &conn, 1024).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Disconnected);

    broker.close_wait().unwrap();
}

#[test]
fn test_broker_request_timeout() {
    let mut config = config("timeout");
    config.request_timeout = 100;
    let broker = Broker::from_config(config).unwrap().spawn().unwrap();
    let addr = broker.client_address().unwrap();

    // connection that never sends its request is closed.
    let mut conn = net::TcpStream::connect(addr.addr).unwrap();
    conn.set_read_timeout(Some(time::Duration::from_secs(10))).unwrap();
    let mut buf = [0_u8; 8];
    assert_eq!(conn.read(&mut buf).unwrap(), 0);

    let client = client_for(&broker);
    assert!(client.create_topic(&topic_name("after-timeout")).unwrap());

    broker.close_wait().unwrap();
}

#[test]
fn test_broker_close_with_pending_publish() {
    let broker = spawn_broker("pending");
    let client = client_for(&broker);
    let name = topic_name("pending");
    assert!(client.create_topic(&name).unwrap());

    // publisher that never streams.
    let mut conn = net::TcpStream::connect(client.to_broker()).unwrap();
    let mut w = io::BufWriter::new(&conn);
    frame::send(&mut w, &Message::PublishData(name.clone())).unwrap();
    frame::flush(&mut w).unwrap();
    mem::drop(w);
    assert!(frame::recv::<_, bool>(&mut &conn, 1024).unwrap());
    wait_until("publisher", || broker.as_registry().unwrap().num_publishers(&name) == 1);

    let broker = broker.close_wait().unwrap();
    assert!(broker.as_registry().is_none());

    conn.set_read_timeout(Some(time::Duration::from_secs(10))).unwrap();
    let mut buf = [0_u8; 8];
    assert!(matches!(conn.read(&mut buf), Ok(0) | Err(_)));
}
