//! Control-socket client for a local parlor instance.
//!
//! Newline-terminated text protocol over a Unix socket: one fresh
//! connection per command, an optional HMAC challenge/response when the
//! instance was started with a shared secret, and a persistent
//! subscription connection for push events. Every socket operation is
//! bounded by a short timeout so a wedged instance stalls one
//! reconciliation attempt, never the whole bridge.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use sha2::Sha256;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Bound on every individual control-socket operation.
pub const IPC_TIMEOUT: Duration = Duration::from_secs(2);

/// The control server tokenizes request lines on spaces, so parameter
/// values are percent-encoded. Everything but RFC 3986 unreserved
/// characters is escaped.
const PARAM_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("control socket timed out")]
    Timeout,

    #[error("control socket closed")]
    Closed,

    #[error("auth failed: {0}")]
    Auth(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Command/query surface of a local parlor instance.
///
/// This is the seam between reconciliation logic and the real socket;
/// tests substitute a recording implementation.
#[async_trait]
pub trait ControlPort: Send + Sync {
    /// Fetch the full state snapshot (`windows`, `chat_log`, ...).
    async fn get_state(&self) -> Result<Value, IpcError>;

    /// Issue one `key=value` command. True when the instance replied `ok`.
    async fn command(&self, cmd: &str, params: &[(&str, String)]) -> bool;
}

/// Default control socket path for an instance id.
pub fn sock_path(instance_id: &str) -> PathBuf {
    PathBuf::from(format!("/tmp/parlor_{instance_id}.sock"))
}

/// Encode a request line: `cmd:<name>` plus percent-encoded `k=v` pairs.
pub fn encode_command(cmd: &str, params: &[(&str, String)]) -> String {
    let mut line = format!("cmd:{cmd}");
    for (key, value) in params {
        line.push(' ');
        line.push_str(key);
        line.push('=');
        line.push_str(&utf8_percent_encode(value, PARAM_ENCODE_SET).to_string());
    }
    line
}

/// Lowercase-hex HMAC-SHA256 of a challenge nonce.
fn hmac_hex(secret: &str, nonce: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(nonce.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Client for one instance's control socket.
#[derive(Debug, Clone)]
pub struct IpcClient {
    sock_path: PathBuf,
    auth_secret: Option<String>,
}

impl IpcClient {
    pub fn new(sock_path: impl Into<PathBuf>, auth_secret: Option<String>) -> Self {
        Self {
            sock_path: sock_path.into(),
            auth_secret,
        }
    }

    pub fn path(&self) -> &Path {
        &self.sock_path
    }

    /// Connect and complete the auth handshake when a secret is set.
    async fn connect(&self) -> Result<BufReader<UnixStream>, IpcError> {
        let stream = timed(UnixStream::connect(&self.sock_path)).await??;
        let mut reader = BufReader::new(stream);
        if let Some(ref secret) = self.auth_secret {
            handshake(&mut reader, secret).await?;
        }
        Ok(reader)
    }

    /// Send one request line and return the first reply line.
    pub async fn request(&self, line: &str) -> Result<String, IpcError> {
        let mut reader = self.connect().await?;
        write_line(&mut reader, line).await?;
        read_line(&mut reader).await
    }

    /// Open a dedicated connection subscribed to push events.
    pub async fn subscribe_events(&self) -> Result<EventStream, IpcError> {
        let mut reader = self.connect().await?;
        write_line(&mut reader, "cmd:subscribe_events").await?;
        let ack = read_line(&mut reader).await?;
        match serde_json::from_str(&ack) {
            Ok(crate::protocol::IpcPush::Subscribed) => Ok(EventStream { reader }),
            _ => Err(IpcError::Malformed(format!("expected subscribe ack, got {ack:?}"))),
        }
    }
}

#[async_trait]
impl ControlPort for IpcClient {
    async fn get_state(&self) -> Result<Value, IpcError> {
        let raw = self.request("cmd:get_state").await?;
        serde_json::from_str(&raw).map_err(|e| IpcError::Malformed(e.to_string()))
    }

    async fn command(&self, cmd: &str, params: &[(&str, String)]) -> bool {
        match self.request(&encode_command(cmd, params)).await {
            Ok(reply) => reply.starts_with("ok"),
            Err(e) => {
                tracing::debug!(cmd = %cmd, error = %e, "Control command failed");
                false
            }
        }
    }
}

/// Push-event side of a subscribed connection. Reads are unbounded:
/// the stream only carries data when the instance has something to say.
pub struct EventStream {
    reader: BufReader<UnixStream>,
}

impl EventStream {
    /// Wait for the next state notification. Unknown push frames are
    /// skipped; a closed stream is an error so the caller resubscribes.
    pub async fn next_event(&mut self) -> Result<String, IpcError> {
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(IpcError::Closed);
            }
            match serde_json::from_str(line.trim()) {
                Ok(crate::protocol::IpcPush::Event { event }) => return Ok(event),
                _ => continue,
            }
        }
    }
}

/// Complete the server-initiated HMAC challenge/response.
async fn handshake(reader: &mut BufReader<UnixStream>, secret: &str) -> Result<(), IpcError> {
    use crate::protocol::{AuthClientMessage, AuthServerMessage};

    let line = read_line(reader).await?;
    let nonce = match serde_json::from_str(&line) {
        Ok(AuthServerMessage::Challenge { nonce }) => nonce,
        _ => return Err(IpcError::Auth(format!("expected challenge, got {line:?}"))),
    };

    let reply = AuthClientMessage::Auth {
        hmac: hmac_hex(secret, &nonce),
    };
    let json = serde_json::to_string(&reply).map_err(|e| IpcError::Malformed(e.to_string()))?;
    write_line(reader, &json).await?;

    let ack = read_line(reader).await?;
    match serde_json::from_str(&ack) {
        Ok(AuthServerMessage::AuthOk) => Ok(()),
        _ => Err(IpcError::Auth(format!("rejected: {ack}"))),
    }
}

async fn write_line(reader: &mut BufReader<UnixStream>, line: &str) -> Result<(), IpcError> {
    let stream = reader.get_mut();
    timed(stream.write_all(line.as_bytes())).await??;
    timed(stream.write_all(b"\n")).await??;
    Ok(())
}

async fn read_line(reader: &mut BufReader<UnixStream>) -> Result<String, IpcError> {
    let mut line = String::new();
    let n = timed(reader.read_line(&mut line)).await??;
    if n == 0 {
        return Err(IpcError::Closed);
    }
    Ok(line.trim_end().to_string())
}

async fn timed<T>(fut: impl std::future::Future<Output = T>) -> Result<T, IpcError> {
    tokio::time::timeout(IPC_TIMEOUT, fut)
        .await
        .map_err(|_| IpcError::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixListener;

    fn temp_sock() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parlor_test.sock");
        (dir, path)
    }

    async fn server_read_line(reader: &mut BufReader<UnixStream>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    /// Accept one connection and answer one request line with `reply`.
    fn serve_one(listener: UnixListener, reply: &'static str) -> tokio::task::JoinHandle<String> {
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let request = server_read_line(&mut reader).await;
            reader
                .get_mut()
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .unwrap();
            request
        })
    }

    #[test]
    fn encode_command_percent_encodes_values() {
        let line = encode_command(
            "exec_command",
            &[
                ("name", "chat_receive".to_string()),
                ("text", "hello there / 100%".to_string()),
            ],
        );
        assert_eq!(
            line,
            "cmd:exec_command name=chat_receive text=hello%20there%20%2F%20100%25"
        );
    }

    #[test]
    fn encode_command_without_params() {
        assert_eq!(encode_command("get_state", &[]), "cmd:get_state");
    }

    #[test]
    fn hmac_hex_matches_rfc_4231_vector() {
        // RFC 4231 test case 2.
        assert_eq!(
            hmac_hex("Jefe", "what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[tokio::test]
    async fn get_state_parses_snapshot() {
        let (_dir, path) = temp_sock();
        let listener = UnixListener::bind(&path).unwrap();
        let server = serve_one(listener, r#"{"windows": [{"id": "w1"}]}"#);

        let client = IpcClient::new(&path, None);
        let state = client.get_state().await.unwrap();
        assert_eq!(state["windows"][0]["id"], "w1");
        assert_eq!(server.await.unwrap(), "cmd:get_state");
    }

    #[tokio::test]
    async fn command_reports_ok_and_err_replies() {
        let (_dir, path) = temp_sock();
        let client = IpcClient::new(&path, None);

        let listener = UnixListener::bind(&path).unwrap();
        let server = serve_one(listener, "ok id=w3");
        assert!(client.command("create_window", &[("type", "plain".to_string())]).await);
        assert_eq!(server.await.unwrap(), "cmd:create_window type=plain");

        std::fs::remove_file(&path).unwrap();
        let listener = UnixListener::bind(&path).unwrap();
        let server = serve_one(listener, "err no such window");
        assert!(!client.command("close_window", &[("id", "ghost".to_string())]).await);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn command_against_missing_socket_is_false() {
        let (_dir, path) = temp_sock();
        let client = IpcClient::new(&path, None);
        assert!(!client.command("close_window", &[("id", "w1".to_string())]).await);
    }

    #[tokio::test]
    async fn auth_handshake_completes_before_command() {
        let (_dir, path) = temp_sock();
        let listener = UnixListener::bind(&path).unwrap();
        let secret = "shared-secret";

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            reader
                .get_mut()
                .write_all(b"{\"type\":\"challenge\",\"nonce\":\"a1b2c3\"}\n")
                .await
                .unwrap();
            let auth = server_read_line(&mut reader).await;
            let parsed: Value = serde_json::from_str(&auth).unwrap();
            assert_eq!(parsed["type"], "auth");
            assert_eq!(parsed["hmac"], hmac_hex("shared-secret", "a1b2c3"));
            reader.get_mut().write_all(b"{\"type\":\"auth_ok\"}\n").await.unwrap();
            let request = server_read_line(&mut reader).await;
            reader.get_mut().write_all(b"ok\n").await.unwrap();
            request
        });

        let client = IpcClient::new(&path, Some(secret.to_string()));
        assert!(client.command("close_window", &[("id", "w1".to_string())]).await);
        assert_eq!(server.await.unwrap(), "cmd:close_window id=w1");
    }

    #[tokio::test]
    async fn auth_rejection_fails_the_attempt() {
        let (_dir, path) = temp_sock();
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            reader
                .get_mut()
                .write_all(b"{\"type\":\"challenge\",\"nonce\":\"a1b2c3\"}\n")
                .await
                .unwrap();
            let _ = server_read_line(&mut reader).await;
            reader
                .get_mut()
                .write_all(b"{\"error\":\"auth_failed\"}\n")
                .await
                .unwrap();
        });

        let client = IpcClient::new(&path, Some("wrong".to_string()));
        match client.get_state().await {
            Err(IpcError::Auth(_)) => {}
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscribe_streams_events_and_skips_unknown_frames() {
        let (_dir, path) = temp_sock();
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let request = server_read_line(&mut reader).await;
            assert_eq!(request, "cmd:subscribe_events");
            let stream = reader.get_mut();
            stream.write_all(b"{\"type\":\"subscribed\"}\n").await.unwrap();
            stream
                .write_all(b"{\"type\":\"event\",\"event\":\"state_changed\"}\n")
                .await
                .unwrap();
            stream.write_all(b"{\"type\":\"noise\"}\n").await.unwrap();
            stream
                .write_all(b"{\"type\":\"event\",\"event\":\"window_closed\"}\n")
                .await
                .unwrap();
        });

        let client = IpcClient::new(&path, None);
        let mut events = client.subscribe_events().await.unwrap();
        assert_eq!(events.next_event().await.unwrap(), "state_changed");
        assert_eq!(events.next_event().await.unwrap(), "window_closed");
        match events.next_event().await {
            Err(IpcError::Closed) => {}
            other => panic!("expected closed stream, got {other:?}"),
        }
    }
}
