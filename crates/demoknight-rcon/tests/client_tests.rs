//! Client tests against an in-process RCON server.

use std::net::SocketAddr;
use std::time::Duration;

use demoknight_rcon::{PacketKind, RconClient, RconError, RconPacket, decode_packet, encode_packet};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const PASSWORD: &str = "hunter2";
const TIMEOUT: Duration = Duration::from_secs(5);

async fn read_packet(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Option<RconPacket> {
    let mut chunk = [0u8; 1024];
    loop {
        if let Ok(Some((packet, used))) = decode_packet(buf) {
            buf.drain(..used);
            return Some(packet);
        }
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buf.extend_from_slice(chunk.get(..read)?);
    }
}

async fn write_packet(stream: &mut TcpStream, packet: RconPacket) -> Option<()> {
    let bytes = encode_packet(&packet).ok()?;
    stream.write_all(&bytes).await.ok()
}

/// Minimal Source-style server: answers each command with `reply(command)`
/// split into `fragments` packets.
async fn spawn_server<F>(fragments: usize, reply: F) -> std::io::Result<SocketAddr>
where
    F: Fn(&str) -> String + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut buf = Vec::new();
        while let Some(packet) = read_packet(&mut stream, &mut buf).await {
            match packet.kind {
                PacketKind::Auth => {
                    let id = if packet.body == PASSWORD { packet.id } else { -1 };
                    write_packet(&mut stream, RconPacket::new(packet.id, PacketKind::ResponseValue, "")).await;
                    write_packet(&mut stream, RconPacket::new(id, PacketKind::AuthResponseOrExec, "")).await;
                }
                PacketKind::AuthResponseOrExec => {
                    let text = reply(&packet.body);
                    let chars: Vec<char> = text.chars().collect();
                    let per = chars.len().div_ceil(fragments.max(1)).max(1);
                    for piece in chars.chunks(per) {
                        let body: String = piece.iter().collect();
                        write_packet(&mut stream, RconPacket::new(packet.id, PacketKind::ResponseValue, body)).await;
                    }
                }
                PacketKind::ResponseValue => {
                    write_packet(&mut stream, RconPacket::new(packet.id, PacketKind::ResponseValue, "")).await;
                }
                PacketKind::Unknown(_) => {}
            }
        }
    });
    Ok(addr)
}

#[tokio::test]
async fn runs_command_and_reassembles_fragments() -> TestResult {
    let addr = spawn_server(3, |cmd| format!("echo: {cmd} / playback is fine")).await?;

    let mut client = RconClient::connect(addr, PASSWORD, TIMEOUT).await?;
    let response = client.run("demo_timescale 1").await?;

    assert_eq!(response, "echo: demo_timescale 1 / playback is fine");
    Ok(())
}

#[tokio::test]
async fn silent_command_returns_empty_text() -> TestResult {
    let addr = spawn_server(1, |_| String::new()).await?;

    let mut client = RconClient::connect(addr, PASSWORD, TIMEOUT).await?;
    assert_eq!(client.run("disconnect").await?, "");
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_rejected() -> TestResult {
    let addr = spawn_server(1, |_| String::new()).await?;

    let result = RconClient::connect(addr, "nope", TIMEOUT).await;
    assert!(matches!(result, Err(RconError::AuthRejected)));
    Ok(())
}

#[tokio::test]
async fn closed_stream_reports_empty_response() -> TestResult {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        // Accept and drop immediately, like a server on a loading screen.
        if let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });

    let result = RconClient::connect(addr, PASSWORD, TIMEOUT).await;
    assert!(matches!(
        result,
        Err(RconError::EmptyResponse | RconError::ConnectionReset)
    ));
    Ok(())
}

#[tokio::test]
async fn nobody_listening_is_connection_refused() -> TestResult {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let result = RconClient::connect(addr, PASSWORD, TIMEOUT).await;
    assert!(matches!(result, Err(RconError::ConnectionRefused)));
    Ok(())
}

#[tokio::test]
async fn unresponsive_server_times_out() -> TestResult {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(stream);
        }
    });

    let result = RconClient::connect(addr, PASSWORD, Duration::from_millis(100)).await;
    assert!(matches!(result, Err(RconError::Timeout(_))));
    Ok(())
}
