//! Single-server scenarios.

use dechat::proto::FrameType;

use crate::common::{TestClient, payloads, spawn_server};

#[tokio::test]
async fn test_hello_world() {
    let addr = spawn_server().await;
    let mut client = TestClient::connect(addr, "anon").await;

    client.send("/create hello").await;
    let join = client.expect().await;
    assert_eq!(join.frame_type, FrameType::Post);
    assert_eq!(join.nickname, "*");
    assert_eq!(join.payload, "anon joined the channel");

    client.send("Hello world!").await;
    let msg = client.expect().await;
    assert_eq!(msg.frame_type, FrameType::Post);
    assert_eq!(msg.nickname, "anon");
    assert_eq!(msg.payload, "Hello world!");

    // A later joiner replays exactly that two-frame history, oldest
    // first, followed by their own join announcement.
    let mut observer = TestClient::connect(addr, "observer").await;
    observer.send("/join hello").await;
    let frames = observer.collect_quiet(300).await;
    assert_eq!(
        payloads(&frames),
        vec![
            "anon joined the channel",
            "Hello world!",
            "observer joined the channel"
        ]
    );
}

#[tokio::test]
async fn test_whisper_reaches_exactly_two() {
    let addr = spawn_server().await;
    let mut a = TestClient::connect(addr, "a").await;
    let mut b = TestClient::connect(addr, "b").await;
    let mut c = TestClient::connect(addr, "c").await;

    a.send("/create room").await;
    b.send("/join room").await;
    c.send("/join room").await;
    a.collect_quiet(300).await;
    b.collect_quiet(300).await;
    c.collect_quiet(300).await;

    a.send("/msg b hi").await;

    for client in [&mut a, &mut b] {
        let frames = client.collect_quiet(300).await;
        assert_eq!(frames.len(), 1, "{} should see the whisper once", client.nick);
        assert_eq!(frames[0].nickname, "a -> b");
        assert_eq!(frames[0].payload, "hi");
        assert_eq!(frames[0].frame_type, FrameType::Post);
    }
    assert!(c.collect_quiet(300).await.is_empty(), "no third party sees it");

    // History is unchanged: a fresh joiner does not replay the whisper.
    let mut d = TestClient::connect(addr, "d").await;
    d.send("/join room").await;
    let frames = d.collect_quiet(300).await;
    assert!(frames.iter().all(|f| f.payload != "hi"));
}

#[tokio::test]
async fn test_password_flow() {
    let addr = spawn_server().await;
    let mut creator = TestClient::connect(addr, "creator").await;
    let mut guest = TestClient::connect(addr, "guest").await;

    creator.send("/create vip secret").await;
    creator.collect_quiet(200).await;

    guest.send("/join vip wrong").await;
    let rejection = guest.expect().await;
    assert_eq!(rejection.frame_type, FrameType::ServerReply);
    assert_eq!(rejection.payload, "Wrong password for vip");

    guest.send("/join vip secret").await;
    let frames = guest.collect_quiet(300).await;
    assert!(
        payloads(&frames).contains(&"guest joined the channel".to_owned()),
        "correct password joins"
    );

    // Creator rejoins with no password argument.
    creator.collect_quiet(200).await;
    creator.send("/quit").await;
    creator.collect_quiet(200).await;
    creator.send("/join vip").await;
    let frames = creator.collect_quiet(300).await;
    assert!(
        payloads(&frames)
            .iter()
            .any(|p| p.contains("creator") && p.contains("joined")),
        "creator is exempt from the password"
    );
}

#[tokio::test]
async fn test_nick_collision_gets_suffixed() {
    let addr = spawn_server().await;
    let mut first = TestClient::connect(addr, "x").await;
    let mut second = TestClient::connect(addr, "x").await;

    first.send("/create room").await;
    first.collect_quiet(200).await;

    second.send("/join room").await;
    let frames = second.collect_quiet(300).await;
    assert!(payloads(&frames).contains(&"x(1) joined the channel".to_owned()));

    // Subsequent messages carry the suffixed nickname.
    second.send("hello").await;
    let frames = second.collect_quiet(300).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].nickname, "x(1)");
}

#[tokio::test]
async fn test_close_sentinel_terminates_connection() {
    let addr = spawn_server().await;
    let mut watcher = TestClient::connect(addr, "watcher").await;
    let mut closer = TestClient::connect(addr, "closer").await;

    closer.close().await;
    assert!(closer.is_closed().await, "server closes the socket");

    // The departed connection no longer counts as a user.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    watcher.send("/info").await;
    let info = watcher.expect().await;
    assert!(
        info.payload.contains("1 connected users"),
        "unexpected info reply: {}",
        info.payload
    );
}

#[tokio::test]
async fn test_info_shape() {
    let addr = spawn_server().await;
    let mut client = TestClient::connect(addr, "nosy").await;

    client.send("/info").await;
    let info = client.expect().await;
    assert_eq!(info.frame_type, FrameType::ServerReply);

    let lines: Vec<&str> = info.payload.split('\n').collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("Server: 127.0.0.1:"));
    assert_eq!(lines[1], "0 channels");
    assert_eq!(lines[2], "1 connected users");
    assert!(lines[3].starts_with("Uptime: "));
}

#[tokio::test]
async fn test_list_channels() {
    let addr = spawn_server().await;
    let mut client = TestClient::connect(addr, "lister").await;

    client.send("/list").await;
    assert_eq!(client.expect().await.payload, "No channels in server");

    client.send("/create general").await;
    client.collect_quiet(200).await;
    client.send("/quit").await;
    client.collect_quiet(200).await;

    client.send("/list").await;
    assert_eq!(client.expect().await.payload, "Channels:\ngeneral");
}

#[tokio::test]
async fn test_unknown_command_is_rejected() {
    let addr = spawn_server().await;
    let mut client = TestClient::connect(addr, "typo").await;

    client.send("/frobnicate now").await;
    assert_eq!(client.expect().await.payload, "Command not recognized");
}

#[tokio::test]
async fn test_invite_reaches_target() {
    let addr = spawn_server().await;
    let mut host = TestClient::connect(addr, "host").await;
    let mut friend = TestClient::connect(addr, "friend").await;

    // The server learns nicknames from any frame they send.
    friend.send("/list").await;
    friend.collect_quiet(200).await;

    host.send("/create hangout").await;
    host.collect_quiet(200).await;
    host.send("/invite friend hangout").await;

    let invite = friend.expect().await;
    assert_eq!(invite.frame_type, FrameType::ServerReply);
    assert_eq!(invite.payload, "You've been invited to hangout");
}
