use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use respd::clock::Clock;
use respd::config::ServerConfig;
use respd::server;

async fn start_server(config: ServerConfig) -> (String, oneshot::Sender<()>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server::run(
            listener,
            async {
                let _ = stop_rx.await;
            },
            &config,
            Clock::System,
        )
        .await
        .unwrap();
    });
    (address, stop_tx, handle)
}

fn cmd(parts: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", parts.len()).into_bytes();
    for part in parts {
        out.extend_from_slice(format!("${}\r\n{}\r\n", part.len(), part).as_bytes());
    }
    out
}

async fn roundtrip(stream: &mut TcpStream, request: &[u8], expected: &[u8]) {
    stream.write_all(request).await.unwrap();
    let mut buf = vec![0u8; expected.len()];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(
        buf,
        expected,
        "got {:?}, want {:?}",
        String::from_utf8_lossy(&buf),
        String::from_utf8_lossy(expected)
    );
}

#[tokio::test]
async fn set_then_get_over_the_wire() {
    let (address, stop, handle) = start_server(ServerConfig::default()).await;
    let mut stream = TcpStream::connect(&address).await.unwrap();

    roundtrip(&mut stream, &cmd(&["SET", "foo", "bar"]), b"+OK\r\n").await;
    roundtrip(&mut stream, &cmd(&["GET", "foo"]), b"$3\r\nbar\r\n").await;

    let _ = stop.send(());
    handle.await.unwrap();
}

#[tokio::test]
async fn keys_expire_on_the_wall_clock() {
    let (address, stop, handle) = start_server(ServerConfig::default()).await;
    let mut stream = TcpStream::connect(&address).await.unwrap();

    roundtrip(
        &mut stream,
        &cmd(&["SET", "foo", "bar", "EX", "1"]),
        b"+OK\r\n",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    roundtrip(&mut stream, &cmd(&["GET", "foo"]), b"$-1\r\n").await;

    let _ = stop.send(());
    handle.await.unwrap();
}

#[tokio::test]
async fn list_push_and_range() {
    let (address, stop, handle) = start_server(ServerConfig::default()).await;
    let mut stream = TcpStream::connect(&address).await.unwrap();

    roundtrip(&mut stream, &cmd(&["LPUSH", "l", "a"]), b":1\r\n").await;
    roundtrip(&mut stream, &cmd(&["LPUSH", "l", "b"]), b":2\r\n").await;
    roundtrip(
        &mut stream,
        &cmd(&["LRANGE", "l", "0", "-1"]),
        b"*2\r\n$1\r\nb\r\n$1\r\na\r\n",
    )
    .await;

    let _ = stop.send(());
    handle.await.unwrap();
}

#[tokio::test]
async fn sorted_set_range_by_score() {
    let (address, stop, handle) = start_server(ServerConfig::default()).await;
    let mut stream = TcpStream::connect(&address).await.unwrap();

    roundtrip(&mut stream, &cmd(&["ZADD", "z", "10", "alice"]), b":1\r\n").await;
    roundtrip(&mut stream, &cmd(&["ZADD", "z", "5", "bob"]), b":1\r\n").await;
    roundtrip(
        &mut stream,
        &cmd(&["ZRANGEBYSCORE", "z", "0", "100"]),
        b"*2\r\n$3\r\nbob\r\n$5\r\nalice\r\n",
    )
    .await;

    let _ = stop.send(());
    handle.await.unwrap();
}

#[tokio::test]
async fn error_replies_over_the_wire() {
    let (address, stop, handle) = start_server(ServerConfig::default()).await;
    let mut stream = TcpStream::connect(&address).await.unwrap();

    roundtrip(
        &mut stream,
        &cmd(&["FLUSHALL", "now"]),
        b"-Err unknown command 'FLUSHALL'\r\n",
    )
    .await;
    roundtrip(
        &mut stream,
        &cmd(&["GET"]),
        b"-Err wrong number of arguments for 'get'\r\n",
    )
    .await;
    roundtrip(&mut stream, &cmd(&["SET", "k", "v"]), b"+OK\r\n").await;
    roundtrip(
        &mut stream,
        &cmd(&["LPUSH", "k", "x"]),
        b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n",
    )
    .await;
    roundtrip(
        &mut stream,
        &cmd(&["SET", "k", "v", "EX", "nope"]),
        b"-Err syntax error\r\n",
    )
    .await;

    let _ = stop.send(());
    handle.await.unwrap();
}

#[tokio::test]
async fn commands_from_two_connections_interleave() {
    let (address, stop, handle) = start_server(ServerConfig::default()).await;
    let mut a = TcpStream::connect(&address).await.unwrap();
    let mut b = TcpStream::connect(&address).await.unwrap();

    roundtrip(&mut a, &cmd(&["SADD", "s", "x"]), b":1\r\n").await;
    roundtrip(&mut b, &cmd(&["SADD", "s", "y"]), b":1\r\n").await;
    roundtrip(&mut a, &cmd(&["SISMEMBER", "s", "y"]), b":1\r\n").await;
    roundtrip(&mut b, &cmd(&["SISMEMBER", "s", "x"]), b":1\r\n").await;

    let _ = stop.send(());
    handle.await.unwrap();
}
