use std::io;

use super::*;

use crate::MAX_FRAME_SIZE;

#[test]
fn test_frame_sequence() {
    let info = PostInfo::new("alice", "txt");
    let items = vec![
        StreamItem::PostInfo(info.clone()),
        StreamItem::Packet(Packet { post_id: info.id, is_final: false, payload: vec![1; 10] }),
        StreamItem::Packet(Packet { post_id: info.id, is_final: true, payload: vec![] }),
    ];

    let mut buf = Vec::default();
    send(&mut buf, &3_i32).unwrap();
    for item in items.iter() {
        send(&mut buf, item).unwrap();
    }

    let mut r = io::Cursor::new(buf);
    assert_eq!(recv::<_, i32>(&mut r, MAX_FRAME_SIZE).unwrap(), 3);
    for item in items.iter() {
        assert_eq!(&recv::<_, StreamItem>(&mut r, MAX_FRAME_SIZE).unwrap(), item);
    }

    let err = recv::<_, StreamItem>(&mut r, MAX_FRAME_SIZE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Disconnected);
}

#[test]
fn test_frame_truncated() {
    let info = PostInfo::new("bob", "png");
    let mut buf = Vec::default();
    send(&mut buf, &StreamItem::PostInfo(info)).unwrap();

    for i in 1..buf.len() {
        let mut r = io::Cursor::new(buf[..i].to_vec());
        let err = recv::<_, StreamItem>(&mut r, MAX_FRAME_SIZE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientBytes, "at {}", i);
    }
}

#[test]
fn test_frame_too_large() {
    let mut buf = Vec::default();
    write_frame(&mut buf, &vec![0; 1024]).unwrap();

    let mut r = io::Cursor::new(buf);
    let err = read_frame(&mut r, 1023).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedFrame);
}

#[test]
fn test_frame_malformed_body() {
    // a frame whose body is shorter than the value it claims to carry.
    let mut buf = Vec::default();
    write_frame(&mut buf, &[1, 0, 0]).unwrap();
    let mut r = io::Cursor::new(buf);
    let err = recv::<_, StreamItem>(&mut r, MAX_FRAME_SIZE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedFrame);

    // trailing bytes after a valid value.
    let mut body = 7_i32.encode().unwrap();
    body.push(0);
    let mut buf = Vec::default();
    write_frame(&mut buf, &body).unwrap();
    let mut r = io::Cursor::new(buf);
    let err = recv::<_, i32>(&mut r, MAX_FRAME_SIZE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedFrame);
}

struct ResetReader;

impl io::Read for ResetReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"))
    }
}

#[test]
fn test_frame_reset() {
    let err = read_frame(&mut ResetReader, MAX_FRAME_SIZE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Disconnected);
}
