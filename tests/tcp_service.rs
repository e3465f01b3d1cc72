mod common;

use common::{decode_data, TcpClient, TestServer, WAIT};
use serde_json::json;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn upload_then_download_from_another_session() {
    let server = TestServer::spawn().await;
    let mut u1 = server.tcp().await;
    let mut u2 = server.tcp().await;
    u1.login("U1", "general").await;
    u2.login("U2", "general").await;

    let r = u1.upload("a.txt", b"hello").await;
    assert_eq!(r["type"], "upload_file");
    assert_eq!(r["status"], "success");

    let r = u2.download("a.txt").await;
    assert_eq!(r["type"], "download_file");
    assert_eq!(decode_data(&r), b"hello");
    assert_eq!(r["uploaded_by"], "U1");
    assert_eq!(r["size"], 5);
}

#[tokio::test]
async fn binary_content_survives_transcoding() {
    let server = TestServer::spawn().await;
    let mut c = server.tcp().await;
    c.login("U1", "general").await;

    let body: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    assert_eq!(c.upload("blob.zip", &body).await["status"], "success");
    assert_eq!(decode_data(&c.download("blob.zip").await), body);
}

#[tokio::test]
async fn list_files_empty_then_one() {
    let server = TestServer::spawn().await;
    let mut c = server.tcp().await;
    c.login("U1", "fresh").await;

    let r = c.request(json!({"type": "list_files"})).await;
    assert_eq!(r["files"], json!([]));

    c.upload("a.txt", b"hello").await;
    let r = c.request(json!({"type": "list_files"})).await;
    let files = r["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["name"], "a.txt");
    assert_eq!(files[0]["size"], 5);
    assert_eq!(files[0]["uploaded_by"], "U1");
    assert!(files[0].get("data").is_none());
}

#[tokio::test]
async fn reupload_keeps_latest() {
    let server = TestServer::spawn().await;
    let mut u1 = server.tcp().await;
    let mut u2 = server.tcp().await;
    u1.login("U1", "general").await;
    u2.login("U2", "general").await;

    u1.upload("a.txt", b"first").await;
    u2.upload("a.txt", b"second!").await;

    let r = u1.request(json!({"type": "list_files"})).await;
    let files = r["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["uploaded_by"], "U2");
    assert_eq!(decode_data(&u1.download("a.txt").await), b"second!");
}

#[tokio::test]
async fn commands_before_join_fail_with_not_in_room() {
    let server = TestServer::spawn().await;
    let mut c = server.tcp().await;
    for msg in [
        json!({"type": "list_files"}),
        json!({"type": "download_file", "filename": "a.txt"}),
        json!({"type": "upload_file", "filename": "a.txt", "data": "aGk="}),
    ] {
        let r = c.request(msg).await;
        assert_eq!(r["status"], "error");
        assert_eq!(r["error"], "not_in_room");
    }
}

#[tokio::test]
async fn create_room_and_list() {
    let server = TestServer::spawn().await;
    let mut c = server.tcp().await;

    let r = c.request(json!({"type": "create_room", "room": "dev"})).await;
    assert_eq!(r["status"], "success");
    let r = c.request(json!({"type": "create_room", "name": "dev"})).await;
    assert_eq!(r["error"], "already_exists");

    let r = c.request(json!({"type": "list_rooms"})).await;
    assert_eq!(r["rooms"], json!(["dev", "general"]));
}

#[tokio::test]
async fn join_unknown_room_creates_it() {
    let server = TestServer::spawn().await;
    let mut c = server.tcp().await;
    c.request(json!({"type": "set_username", "username": "U1"})).await;

    let r = c.request(json!({"type": "join_room", "room": "nosuchroom"})).await;
    assert_eq!(r["status"], "success");
    assert_eq!(r["room"], "nosuchroom");
    assert_eq!(r["members"], json!(["U1"]));
    assert_eq!(r["files"], json!([]));
    assert!(server.registry().contains("nosuchroom").await);
}

#[tokio::test]
async fn join_unknown_room_fails_when_policy_requires_existing() {
    let server = TestServer::spawn_with(&[("JOIN_POLICY", "existing")]).await;
    let mut c = server.tcp().await;

    let r = c.request(json!({"type": "join_room", "room": "nosuchroom"})).await;
    assert_eq!(r["error"], "not_found");
    assert!(!server.registry().contains("nosuchroom").await);

    let r = c.request(json!({"type": "join_room", "room": "general"})).await;
    assert_eq!(r["status"], "success");
}

#[tokio::test]
async fn join_reports_existing_files_and_members() {
    let server = TestServer::spawn().await;
    let mut u1 = server.tcp().await;
    u1.login("U1", "general").await;
    u1.upload("a.txt", b"hello").await;

    let mut u2 = server.tcp().await;
    u2.request(json!({"type": "set_username", "username": "U2"})).await;
    let r = u2.request(json!({"type": "join_room", "room": "general"})).await;
    assert_eq!(r["room_files"], json!(["a.txt"]));
    assert_eq!(r["members"], json!(["U1", "U2"]));
}

#[tokio::test]
async fn download_missing_file_has_no_side_effect() {
    let server = TestServer::spawn().await;
    let mut c = server.tcp().await;
    c.login("U1", "general").await;
    let before = server.registry().list_rooms().await;

    let r = c.download("ghost.txt").await;
    assert_eq!(r["error"], "not_found");
    assert_eq!(server.registry().list_rooms().await, before);
    assert!(server.registry().list_files("general").await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_and_unknown_messages_keep_connection_open() {
    let server = TestServer::spawn().await;
    let mut c = server.tcp().await;

    c.send_raw(b"{not json".to_vec()).await;
    let r = c.recv().await;
    assert_eq!(r["error"], "bad_request");
    assert_eq!(r["type"], "error");

    let r = c.request(json!({"type": "delete_everything"})).await;
    assert_eq!(r["error"], "bad_request");
    assert_eq!(r["type"], "delete_everything");

    let r = c.request(json!({"type": "list_rooms"})).await;
    assert_eq!(r["status"], "success");
}

#[tokio::test]
async fn oversized_frame_rejected_and_connection_survives() {
    let server = TestServer::spawn_with(&[("MAX_FRAME_BYTES", "1024")]).await;
    let mut c = server.tcp().await;
    c.login("U1", "general").await;

    let r = c.upload("big.txt", &vec![b'x'; 4096]).await;
    assert_eq!(r["status"], "error");
    assert_eq!(r["error"], "payload_too_large");

    let r = c.upload("small.txt", b"ok").await;
    assert_eq!(r["status"], "success");
    assert_eq!(server.registry().list_files("general").await.unwrap().len(), 1);
}

#[tokio::test]
async fn upload_over_limit_rejected() {
    let server = TestServer::spawn_with(&[("MAX_UPLOAD_BYTES", "8")]).await;
    let mut c = server.tcp().await;
    c.login("U1", "general").await;
    let r = c.upload("a.txt", b"123456789").await;
    assert_eq!(r["error"], "payload_too_large");
}

#[tokio::test]
async fn disconnect_removes_membership() {
    let server = TestServer::spawn().await;
    let mut c = server.tcp().await;
    c.login("leaver", "general").await;
    assert_eq!(server.registry().members("general").await.unwrap(), vec!["leaver".to_string()]);
    drop(c);

    wait_for_members(&server, "general", &[]).await;
}

#[tokio::test]
async fn disconnect_without_room_is_clean() {
    let server = TestServer::spawn().await;
    let mut c = server.tcp().await;
    c.request(json!({"type": "set_username", "username": "ghost"})).await;
    drop(c);

    // still serving, no dangling membership anywhere
    let mut other = server.tcp().await;
    let r = other.request(json!({"type": "list_rooms"})).await;
    assert_eq!(r["status"], "success");
    for room in server.registry().list_rooms().await {
        assert!(server.registry().members(&room).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn truncated_frame_tears_down_session() {
    let server = TestServer::spawn().await;
    let mut stayer = server.tcp().await;
    stayer.login("stayer", "general").await;
    let mut quitter = server.tcp().await;
    quitter.login("quitter", "general").await;
    wait_for_members(&server, "general", &["quitter", "stayer"]).await;

    let mut raw = quitter.into_stream();
    // header promises 100 bytes, connection ends after 3
    raw.write_all(&100u32.to_be_bytes()).await.unwrap();
    raw.write_all(b"abc").await.unwrap();
    drop(raw);

    wait_for_members(&server, "general", &["stayer"]).await;
    let r = stayer.request(json!({"type": "list_files"})).await;
    assert_eq!(r["status"], "success");
}

#[tokio::test]
async fn concurrent_uploads_to_different_rooms_do_not_block() {
    let server = TestServer::spawn().await;
    let mut tasks = Vec::new();
    for i in 0..8 {
        let addr = server.running.tcp_addr;
        tasks.push(tokio::spawn(async move {
            let mut c = TcpClient::connect(addr).await;
            let room = format!("room{i}");
            c.login(&format!("U{i}"), &room).await;
            let body = vec![b'a' + i as u8; 200_000];
            let r = c.upload("data.txt", &body).await;
            assert_eq!(r["status"], "success");
            assert_eq!(common::decode_data(&c.download("data.txt").await), body);
        }));
    }
    tokio::time::timeout(WAIT, async {
        for t in tasks {
            t.await.unwrap();
        }
    })
    .await
    .expect("uploads stalled");
}

#[tokio::test]
async fn concurrent_same_name_uploads_leave_one_consistent_record() {
    let server = TestServer::spawn().await;
    let mut tasks = Vec::new();
    for i in 0..6 {
        let addr = server.running.tcp_addr;
        tasks.push(tokio::spawn(async move {
            let mut c = TcpClient::connect(addr).await;
            let user = format!("U{i}");
            c.login(&user, "general").await;
            c.upload("race.txt", user.as_bytes()).await
        }));
    }
    for t in tasks {
        assert_eq!(t.await.unwrap()["status"], "success");
    }

    let files = server.registry().list_files("general").await.unwrap();
    assert_eq!(files.len(), 1);
    let rec = server.registry().get_file("general", "race.txt").await.unwrap();
    assert_eq!(&rec.content[..], rec.uploaded_by.as_bytes());
}

#[tokio::test]
async fn connections_past_limit_are_refused() {
    let server = TestServer::spawn_with(&[("MAX_CONNECTIONS", "1")]).await;
    let mut first = server.tcp().await;
    assert_eq!(first.request(json!({"type": "list_rooms"})).await["status"], "success");

    let mut second = tokio::net::TcpStream::connect(server.running.tcp_addr).await.unwrap();
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(WAIT, tokio::io::AsyncReadExt::read(&mut second, &mut buf))
        .await
        .expect("refused connection should close")
        .unwrap_or(0);
    assert_eq!(n, 0);

    // the first session is unaffected
    assert_eq!(first.request(json!({"type": "list_rooms"})).await["status"], "success");
}

async fn wait_for_members(server: &TestServer, room: &str, expected: &[&str]) {
    tokio::time::timeout(WAIT, async {
        while server.registry().members(room).await.unwrap() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("members of {room} never became {expected:?}"));
}
