use std::borrow::Cow;

use comms::msg::{Command, Msg, Payload};
use tokio::io;

#[tokio::test]
async fn send_recv_values() {
    const SIZE: usize = 256;

    let values = [1.5_f32, -2.0, 4.25];

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    tx.send(&Msg::Data(Payload::Partial(&values))).await.unwrap();
    tx.send(&Msg::Control(Command::Barrier)).await.unwrap();
    tx.send(&Msg::Err(Cow::Borrowed("boom"))).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);
    let mut buf: Vec<f32> = Vec::new();

    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Data(Payload::Partial(got)) => assert_eq!(got, values),
        other => panic!("unexpected msg: {other:?}"),
    }

    let msg: Msg = rx.recv_into(&mut buf).await.unwrap();
    assert_eq!(msg, Msg::Control(Command::Barrier));

    let msg: Msg = rx.recv_into(&mut buf).await.unwrap();
    assert_eq!(msg, Msg::Err(Cow::Borrowed("boom")));
}

#[tokio::test]
async fn empty_payload_round_trips() {
    let (one, two) = io::duplex(64);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    tx.send(&Msg::Data(Payload::Reduced(&[]))).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);
    let mut buf: Vec<u32> = Vec::new();

    let msg: Msg = rx.recv_into(&mut buf).await.unwrap();
    assert_eq!(msg, Msg::Data(Payload::Reduced(&[])));
}

#[tokio::test]
async fn oversized_frames_are_refused() {
    let values = [0.0_f32; 16];

    let (one, two) = io::duplex(256);
    let (rx, tx) = io::split(one);
    let (_, tx) = comms::channel(rx, tx);
    let mut small_tx = tx.with_max_frame_len(32);

    let err = small_tx
        .send(&Msg::Data(Payload::Partial(&values)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

    let (rx, tx) = io::split(two);
    let (rx, _) = comms::channel(rx, tx);
    let mut rx = rx.with_max_frame_len(8);
    drop(small_tx);

    // Nothing was written, the peer sees the stream end.
    let mut buf: Vec<f32> = Vec::new();
    let err = rx.recv_into::<Msg, _>(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}

#[tokio::test]
async fn receiver_enforces_its_limit() {
    let values = [1.0_f32; 8];

    let (one, two) = io::duplex(256);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);
    tx.send(&Msg::Data(Payload::Reduced(&values))).await.unwrap();

    let (rx, tx) = io::split(two);
    let (rx, _) = comms::channel(rx, tx);
    let mut rx = rx.with_max_frame_len(16);

    let mut buf: Vec<f32> = Vec::new();
    let err = rx.recv_into::<Msg, _>(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}
