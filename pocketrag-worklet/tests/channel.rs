//! Host/worklet traffic through the public API.

use bytes::Bytes;
use futures::StreamExt;
use pocketrag_worklet::{ChannelError, Worklet, WorkletState};
use std::time::Duration;

const ECHO: &str = r#"
IPC.on('data', function(msg)
  IPC.write('pong: ' .. msg)
end)
"#;

async fn recv_timeout(worklet: &Worklet) -> Bytes {
    tokio::time::timeout(Duration::from_secs(5), worklet.recv())
        .await
        .expect("worklet did not answer in time")
        .unwrap()
}

#[tokio::test]
async fn ping_written_before_handler_is_still_delivered() {
    let worklet = Worklet::start("/app.lua", ECHO).await.unwrap();
    worklet.write(&b"ping"[..]).unwrap();

    // Give the reply time to arrive before anyone listens
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (tx, rx) = flume::unbounded();
    worklet
        .on_data(move |bytes| {
            let _ = tx.send(bytes);
        })
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), rx.recv_async())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply[..], b"pong: ping");
    worklet.stop().await.unwrap();
}

#[tokio::test]
async fn messages_written_by_top_level_code_are_buffered() {
    let worklet = Worklet::start("/hello.lua", "IPC.write('hello'); IPC.write('world')")
        .await
        .unwrap();
    let greeting: Vec<Bytes> = worklet.incoming().take(2).collect().await;
    assert_eq!(greeting, vec![Bytes::from("hello"), Bytes::from("world")]);
    worklet.stop().await.unwrap();
}

#[tokio::test]
async fn replies_arrive_in_send_order() {
    let worklet = Worklet::start("/app.lua", ECHO).await.unwrap();
    for i in 0..200 {
        worklet.write(format!("{i}")).unwrap();
    }
    for i in 0..200 {
        assert_eq!(recv_timeout(&worklet).await, Bytes::from(format!("pong: {i}")));
    }
    worklet.stop().await.unwrap();
}

#[tokio::test]
async fn binary_payloads_pass_through_unchanged() {
    let worklet = Worklet::start("/echo.lua", "IPC.on('data', function(m) IPC.write(m) end)")
        .await
        .unwrap();
    let payload: Vec<u8> = (0..=255u8).collect();
    worklet.write(payload.clone()).unwrap();
    assert_eq!(recv_timeout(&worklet).await.to_vec(), payload);
    worklet.stop().await.unwrap();
}

#[tokio::test]
async fn writes_after_stop_fail_with_channel_closed() {
    let worklet = Worklet::start("/app.lua", ECHO).await.unwrap();
    worklet.stop().await.unwrap();
    assert_eq!(worklet.state(), WorkletState::Stopped);
    assert_eq!(worklet.write(&b"late"[..]), Err(ChannelError::ChannelClosed));
    assert_eq!(worklet.recv().await, Err(ChannelError::ChannelClosed));
    // A second stop is harmless
    worklet.stop().await.unwrap();
}

#[tokio::test]
async fn crash_in_handler_makes_peer_unavailable() {
    let worklet = Worklet::start(
        "/crashy.lua",
        "IPC.on('data', function(m) error('boom: ' .. m) end)",
    )
    .await
    .unwrap();
    worklet.write(&b"first"[..]).unwrap();

    // The thread records the crash before dropping its end of the channel
    let err = tokio::time::timeout(Duration::from_secs(5), worklet.recv())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, ChannelError::PeerUnavailable { .. }));
    assert_eq!(worklet.state(), WorkletState::Crashed);
    assert!(worklet.crash_reason().unwrap().contains("boom: first"));
    assert!(matches!(
        worklet.write(&b"second"[..]),
        Err(ChannelError::PeerUnavailable { .. })
    ));
}

#[tokio::test]
async fn syntax_error_is_reported_at_start() {
    let err = Worklet::start("/broken.lua", "IPC.on('data', function(")
        .await
        .unwrap_err();
    match err {
        ChannelError::Startup { entry_point, .. } => assert_eq!(entry_point, "/broken.lua"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn sandbox_hides_os_and_io() {
    let err = Worklet::start("/escape.lua", "os.execute('true')")
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::Startup { .. }));
}

#[tokio::test]
async fn stop_interrupts_a_busy_script() {
    let worklet = Worklet::start(
        "/spin.lua",
        "IPC.on('data', function() while true do end end)",
    )
    .await
    .unwrap();
    worklet.write(&b"go"[..]).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(5), worklet.stop())
        .await
        .expect("stop should interrupt the loop")
        .unwrap();
    assert_eq!(worklet.state(), WorkletState::Stopped);
}

#[tokio::test]
async fn only_one_data_handler() {
    let worklet = Worklet::start("/app.lua", ECHO).await.unwrap();
    worklet.on_data(|_| {}).unwrap();
    assert!(matches!(
        worklet.on_data(|_| {}),
        Err(ChannelError::HandlerAlreadySet)
    ));
    worklet.stop().await.unwrap();
}

#[tokio::test]
async fn abandoned_start_of_endless_script_returns_control() {
    let started = tokio::time::timeout(
        Duration::from_millis(200),
        Worklet::start("/server.lua", "while true do end"),
    )
    .await;
    assert!(started.is_err(), "top-level code never finishes");

    // The interrupted thread does not hold anything later worklets need
    let worklet = Worklet::start("/app.lua", ECHO).await.unwrap();
    worklet.write(&b"after"[..]).unwrap();
    assert_eq!(recv_timeout(&worklet).await, Bytes::from("pong: after"));
    worklet.stop().await.unwrap();
}
