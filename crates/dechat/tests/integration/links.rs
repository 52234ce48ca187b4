//! Inter-server link scenarios.

use std::net::SocketAddr;
use std::time::Duration;

use dechat::proto::FrameType;

use crate::common::{TestClient, spawn_server};

/// Create `room` on both servers and link them via the handshake.
/// Returns the two operators, still joined to their rooms.
async fn linked_rooms(s1: SocketAddr, s2: SocketAddr) -> (TestClient, TestClient) {
    let mut op1 = TestClient::connect(s1, "op1").await;
    op1.send("/create room").await;
    op1.collect_quiet(200).await;

    let mut op2 = TestClient::connect(s2, "op2").await;
    op2.send("/create room").await;
    op2.collect_quiet(200).await;

    op1.send(&format!("/link room 127.0.0.1:{}", s2.port())).await;
    // Dial + directive + response round trip.
    tokio::time::sleep(Duration::from_millis(500)).await;

    (op1, op2)
}

#[tokio::test]
async fn test_linked_echo_no_loop() {
    let s1 = spawn_server().await;
    let s2 = spawn_server().await;
    let (mut op1, mut op2) = linked_rooms(s1, s2).await;

    op1.send("mirror me").await;

    let local: Vec<_> = op1
        .collect_quiet(400)
        .await
        .into_iter()
        .filter(|f| f.payload == "mirror me")
        .collect();
    assert_eq!(local.len(), 1, "origin member sees the post exactly once");

    let mirrored: Vec<_> = op2
        .collect_quiet(400)
        .await
        .into_iter()
        .filter(|f| f.payload == "mirror me")
        .collect();
    assert_eq!(mirrored.len(), 1, "linked member sees the post exactly once");
    assert_eq!(mirrored[0].frame_type, FrameType::Post);
    assert_eq!(mirrored[0].nickname, "op1");
}

#[tokio::test]
async fn test_link_is_bidirectional_after_handshake() {
    let s1 = spawn_server().await;
    let s2 = spawn_server().await;
    let (mut op1, mut op2) = linked_rooms(s1, s2).await;

    // The response leg gave the initiator its own edge, so posts flow
    // the other way too.
    op2.send("back at you").await;

    let received: Vec<_> = op1
        .collect_quiet(400)
        .await
        .into_iter()
        .filter(|f| f.payload == "back at you")
        .collect();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].nickname, "op2");
}

#[tokio::test]
async fn test_announcements_mirror_too() {
    let s1 = spawn_server().await;
    let s2 = spawn_server().await;
    let (_op1, mut op2) = linked_rooms(s1, s2).await;

    // A member joining the origin room is announced on the linked one.
    let mut member = TestClient::connect(s1, "wanderer").await;
    member.send("/join room").await;
    member.collect_quiet(300).await;

    let announced = op2
        .collect_quiet(400)
        .await
        .iter()
        .any(|f| f.payload == "wanderer joined the channel");
    assert!(announced);
}

#[tokio::test]
async fn test_link_to_missing_channel_is_rejected() {
    let s1 = spawn_server().await;
    let s2 = spawn_server().await;

    let mut op1 = TestClient::connect(s1, "op1").await;
    op1.send("/create lonely").await;
    op1.collect_quiet(200).await;

    // s2 has no such channel; the peer answers with the failure id and
    // no edge forms, so posts stay local.
    op1.send(&format!("/link lonely 127.0.0.1:{}", s2.port())).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut op2 = TestClient::connect(s2, "op2").await;
    op2.send("/create lonely").await;
    op2.collect_quiet(200).await;

    op1.send("anyone there?").await;
    assert!(
        op2.collect_quiet(400)
            .await
            .iter()
            .all(|f| f.payload != "anyone there?")
    );
}

#[tokio::test]
async fn test_unlink_stops_mirroring() {
    let s1 = spawn_server().await;
    let s2 = spawn_server().await;
    let (mut op1, mut op2) = linked_rooms(s1, s2).await;

    op1.send(&format!("/unlink room 127.0.0.1:{}", s2.port())).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    op1.collect_quiet(200).await;
    op2.collect_quiet(200).await;

    op1.send("into the void").await;
    assert!(
        op2.collect_quiet(400)
            .await
            .iter()
            .all(|f| f.payload != "into the void")
    );
}
