mod support;

use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsFrame};

use domain::UserId;
use futures_util::SinkExt;
use support::{expect_event, next_event, send_event, TestServer, TEST_SECRET};
use uuid::Uuid;
use web_api::{JwtConfig, JwtService};

#[tokio::test]
async fn handshake_requires_token() {
    let server = TestServer::spawn().await;

    let anonymous = connect_async(format!("{}/api/v1/ws", server.base_ws)).await;
    assert!(anonymous.is_err());

    let forged = connect_async(format!("{}/api/v1/ws?token=garbage", server.base_ws)).await;
    assert!(forged.is_err());

    // 签名有效但用户不存在
    let ghost = JwtService::new(JwtConfig {
        secret: TEST_SECRET.to_owned(),
        expiration_hours: 1,
    })
    .generate_token(UserId::from(Uuid::new_v4()))
    .unwrap();
    let unknown = connect_async(format!("{}/api/v1/ws?token={ghost}", server.base_ws)).await;
    assert!(unknown.is_err());
}

#[tokio::test]
async fn room_members_receive_messages_and_receipts() {
    let server = TestServer::spawn().await;
    let (rex_id, rex) = server.signup("rex").await;
    let (luna_id, luna) = server.signup("luna").await;
    let conversation_id = server.open_conversation(&rex, &luna_id).await;

    let mut rex_ws = server.connect_ws(&rex).await;
    expect_event(&mut rex_ws, "user_online").await;
    send_event(
        &mut rex_ws,
        json!({"event": "join_conversation", "data": conversation_id}),
    )
    .await;

    let mut luna_ws = server.connect_ws(&luna).await;
    expect_event(&mut luna_ws, "user_online").await;
    send_event(
        &mut luna_ws,
        json!({"event": "join_conversation", "data": conversation_id}),
    )
    .await;

    // 双方互相看到对方在房间里
    let joined = expect_event(&mut rex_ws, "peer_joined_conversation").await;
    assert_eq!(joined["userId"], luna_id);
    let present = expect_event(&mut luna_ws, "peer_joined_conversation").await;
    assert_eq!(present["userId"], rex_id);

    send_event(
        &mut luna_ws,
        json!({"event": "typing", "data": conversation_id}),
    )
    .await;
    let typing = expect_event(&mut rex_ws, "typing").await;
    assert_eq!(typing["userId"], luna_id);

    send_event(
        &mut luna_ws,
        json!({
            "event": "send_message",
            "data": {"conversationId": conversation_id, "body": "woof"}
        }),
    )
    .await;
    let for_rex = expect_event(&mut rex_ws, "message:new").await;
    assert_eq!(for_rex["body"], "woof");
    assert_eq!(for_rex["senderName"], "luna");
    let for_luna = expect_event(&mut luna_ws, "message:new").await;
    assert_eq!(for_luna["id"], for_rex["id"]);

    send_event(
        &mut rex_ws,
        json!({"event": "mark_read", "data": conversation_id}),
    )
    .await;
    let receipt = expect_event(&mut luna_ws, "message:read").await;
    assert_eq!(receipt["userId"], rex_id);
    assert_eq!(receipt["conversationId"], conversation_id);

    send_event(
        &mut rex_ws,
        json!({
            "event": "theme_updated",
            "data": {"conversationId": conversation_id, "theme": "sunset"}
        }),
    )
    .await;
    let theme = expect_event(&mut luna_ws, "theme:updated").await;
    assert_eq!(theme["theme"], "sunset");

    send_event(
        &mut luna_ws,
        json!({"event": "leave_conversation", "data": conversation_id}),
    )
    .await;
    let left = expect_event(&mut rex_ws, "peer_left_conversation").await;
    assert_eq!(left["userId"], luna_id);

    drop(luna_ws);
    let offline = expect_event(&mut rex_ws, "user_offline").await;
    assert_eq!(offline["userId"], luna_id);
}

#[tokio::test]
async fn participant_outside_room_gets_unread_notice() {
    let server = TestServer::spawn().await;
    let (rex_id, rex) = server.signup("rex").await;
    let (luna_id, luna) = server.signup("luna").await;
    let conversation_id = server.open_conversation(&rex, &luna_id).await;

    let mut luna_ws = server.connect_ws(&luna).await;
    expect_event(&mut luna_ws, "user_online").await;

    let mut rex_ws = server.connect_ws(&rex).await;
    expect_event(&mut rex_ws, "user_online").await;
    send_event(
        &mut rex_ws,
        json!({"event": "join_conversation", "data": conversation_id}),
    )
    .await;
    send_event(
        &mut rex_ws,
        json!({
            "event": "send_message",
            "data": {"conversationId": conversation_id, "imageUrl": "http://cdn/bone.png"}
        }),
    )
    .await;

    let notice = expect_event(&mut luna_ws, "conversation:unread").await;
    assert_eq!(notice["conversationId"], conversation_id);
    assert_eq!(notice["senderId"], rex_id);
    assert_eq!(notice["senderName"], "rex");
    assert_eq!(notice["message"], "[image]");

    let own = expect_event(&mut rex_ws, "message:new").await;
    assert_eq!(own["imageUrl"], "http://cdn/bone.png");

    // REST 发送的消息同样实时推送
    let sent = server
        .client
        .post(server.url(&format!("/api/v1/conversations/{conversation_id}/messages")))
        .bearer_auth(&luna)
        .json(&json!({"body": "sniff"}))
        .send()
        .await
        .unwrap();
    assert_eq!(sent.status(), 201);
    let pushed = expect_event(&mut rex_ws, "message:new").await;
    assert_eq!(pushed["body"], "sniff");
}

#[tokio::test]
async fn invalid_frames_are_answered_with_errors() {
    let server = TestServer::spawn().await;
    let (_, rex) = server.signup("rex").await;
    let (luna_id, luna) = server.signup("luna").await;
    let (_, milo) = server.signup("milo").await;
    let conversation_id = server.open_conversation(&rex, &luna_id).await;

    let mut rex_ws = server.connect_ws(&rex).await;
    expect_event(&mut rex_ws, "user_online").await;

    rex_ws
        .send(WsFrame::Text("not json".into()))
        .await
        .unwrap();
    let error = expect_event(&mut rex_ws, "message:error").await;
    assert!(error["message"].is_string());

    send_event(&mut rex_ws, json!({"event": "shout", "data": 1})).await;
    expect_event(&mut rex_ws, "message:error").await;

    // 房间外的输入状态被静默忽略：下一条收到的是后面那帧的错误
    send_event(
        &mut rex_ws,
        json!({"event": "typing", "data": conversation_id}),
    )
    .await;
    send_event(&mut rex_ws, json!({"event": "mark_read", "data": "seven"})).await;
    let next = next_event(&mut rex_ws).await.expect("error frame");
    assert_eq!(next["event"], "message:error");

    let mut milo_ws = server.connect_ws(&milo).await;
    expect_event(&mut milo_ws, "user_online").await;
    send_event(
        &mut milo_ws,
        json!({"event": "join_conversation", "data": conversation_id}),
    )
    .await;
    let forbidden = expect_event(&mut milo_ws, "message:error").await;
    assert!(forbidden["message"]
        .as_str()
        .unwrap()
        .contains("participant"));

    // 连接仍然可用
    send_event(
        &mut rex_ws,
        json!({"event": "join_conversation", "data": conversation_id}),
    )
    .await;
    send_event(
        &mut rex_ws,
        json!({
            "event": "send_message",
            "data": {"conversationId": conversation_id, "body": "still here"}
        }),
    )
    .await;
    let message = expect_event(&mut rex_ws, "message:new").await;
    assert_eq!(message["body"], "still here");
}

#[tokio::test]
async fn second_connection_replaces_the_first() {
    let server = TestServer::spawn().await;
    let (rex_id, rex) = server.signup("rex").await;
    let (_, luna) = server.signup("luna").await;

    let mut luna_ws = server.connect_ws(&luna).await;
    expect_event(&mut luna_ws, "user_online").await;

    let mut first = server.connect_ws(&rex).await;
    expect_event(&mut first, "user_online").await;
    let online = expect_event(&mut luna_ws, "user_online").await;
    assert_eq!(online["userId"], rex_id);

    let mut second = server.connect_ws(&rex).await;
    expect_event(&mut second, "user_online").await;

    // 旧连接被服务端关闭
    let mut closed = false;
    for _ in 0..10 {
        if next_event(&mut first).await.is_none() {
            closed = true;
            break;
        }
    }
    assert!(closed);

    // 被顶替的连接断开不会让用户显示离线
    let online: serde_json::Value = server
        .client
        .get(server.url("/api/v1/presence/online"))
        .bearer_auth(&luna)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(online
        .as_array()
        .unwrap()
        .iter()
        .any(|id| id == &serde_json::Value::String(rex_id.clone())));

    drop(second);
    let offline = expect_event(&mut luna_ws, "user_offline").await;
    assert_eq!(offline["userId"], rex_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_senders_are_seen_in_id_order() {
    const PER_SOCKET: usize = 30;
    const OVER_REST: usize = 10;

    let server = TestServer::spawn().await;
    let (_, rex) = server.signup("rex").await;
    let (luna_id, luna) = server.signup("luna").await;
    let conversation_id = server.open_conversation(&rex, &luna_id).await;

    let mut rex_ws = server.connect_ws(&rex).await;
    let mut luna_ws = server.connect_ws(&luna).await;
    for socket in [&mut rex_ws, &mut luna_ws] {
        send_event(
            socket,
            json!({"event": "join_conversation", "data": conversation_id}),
        )
        .await;
    }
    expect_event(&mut rex_ws, "peer_joined_conversation").await;
    expect_event(&mut luna_ws, "peer_joined_conversation").await;

    // REST 发送和两条 WebSocket 连接同时写同一个会话
    let rest = {
        let client = server.client.clone();
        let url = server.url(&format!("/api/v1/conversations/{conversation_id}/messages"));
        let token = rex.clone();
        tokio::spawn(async move {
            for n in 0..OVER_REST {
                let sent = client
                    .post(&url)
                    .bearer_auth(&token)
                    .json(&json!({"body": format!("rest {n}")}))
                    .send()
                    .await
                    .unwrap();
                assert_eq!(sent.status(), 201);
            }
        })
    };
    for n in 0..PER_SOCKET {
        for socket in [&mut rex_ws, &mut luna_ws] {
            send_event(
                socket,
                json!({
                    "event": "send_message",
                    "data": {"conversationId": conversation_id, "body": format!("ws {n}")}
                }),
            )
            .await;
        }
    }
    rest.await.unwrap();

    let total = PER_SOCKET * 2 + OVER_REST;
    for socket in [&mut rex_ws, &mut luna_ws] {
        let mut ids = Vec::with_capacity(total);
        while ids.len() < total {
            let message = expect_event(socket, "message:new").await;
            ids.push(message["id"].as_i64().expect("message id"));
        }
        assert!(
            ids.windows(2).all(|pair| pair[0] < pair[1]),
            "ids out of order: {ids:?}"
        );
    }
}
