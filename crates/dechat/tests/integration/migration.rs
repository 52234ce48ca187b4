//! Channel migration between linked servers.

use std::time::Duration;

use dechat::proto::{ControlRecord, FrameType, LinkRef};

use crate::common::{TestClient, payloads, spawn_server};

#[tokio::test]
async fn test_migrate_moves_the_channel() {
    let s1 = spawn_server().await;
    let s2 = spawn_server().await;

    let mut op1 = TestClient::connect(s1, "op1").await;
    op1.send("/create room").await;
    op1.collect_quiet(200).await;

    let mut op2 = TestClient::connect(s2, "op2").await;
    op2.send("/create room").await;
    op2.collect_quiet(200).await;

    op1.send(&format!("/link room 127.0.0.1:{}", s2.port())).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    // A rides along on s1, B on s2.
    let mut a = TestClient::connect(s1, "a").await;
    a.send("/join room").await;
    a.collect_quiet(300).await;
    let mut b = TestClient::connect(s2, "b").await;
    b.send("/join room").await;
    b.collect_quiet(300).await;
    op1.collect_quiet(200).await;
    op2.collect_quiet(200).await;

    op1.send(&format!("/migrate room 127.0.0.1:{}", s2.port())).await;

    // Every member of the origin room gets the migrate directive.
    let directives: Vec<ControlRecord> = a
        .collect_quiet(400)
        .await
        .iter()
        .filter(|f| f.frame_type == FrameType::Control)
        .map(|f| ControlRecord::parse(&f.payload).expect("parse directive"))
        .collect();
    assert_eq!(
        directives,
        vec![ControlRecord::Migrate(LinkRef::new(
            "room",
            "127.0.0.1",
            s2.port()
        ))]
    );

    // Members of the target room see nothing of the migration broadcast.
    assert!(
        b.collect_quiet(300)
            .await
            .iter()
            .all(|f| f.frame_type != FrameType::Control)
    );

    // A follows the directive: reconnect to s2 and join the room there.
    let mut a2 = TestClient::connect(s2, "a").await;
    a2.send("/join room").await;
    let frames = a2.collect_quiet(300).await;
    assert!(payloads(&frames).contains(&"a joined the channel".to_owned()));

    // B sees A arrive.
    assert!(
        payloads(&b.collect_quiet(300).await).contains(&"a joined the channel".to_owned())
    );

    // The origin room is gone.
    let mut late = TestClient::connect(s1, "late").await;
    late.send("/join room").await;
    assert_eq!(late.expect().await.payload, "room doesn't exist");
}

#[tokio::test]
async fn test_migrate_severs_the_reverse_link() {
    let s1 = spawn_server().await;
    let s2 = spawn_server().await;

    let mut op1 = TestClient::connect(s1, "op1").await;
    op1.send("/create room").await;
    op1.collect_quiet(200).await;
    let mut op2 = TestClient::connect(s2, "op2").await;
    op2.send("/create room").await;
    op2.collect_quiet(200).await;

    op1.send(&format!("/link room 127.0.0.1:{}", s2.port())).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    op1.send(&format!("/migrate room 127.0.0.1:{}", s2.port())).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    op1.collect_quiet(200).await;
    op2.collect_quiet(200).await;

    // The peer dropped its edge back to the origin: posts in the target
    // room no longer try to mirror into a channel that is gone.
    op2.send("life goes on").await;
    let frames = op2.collect_quiet(300).await;
    assert_eq!(payloads(&frames), vec!["life goes on"]);
    assert!(op1.collect_quiet(300).await.is_empty());
}
