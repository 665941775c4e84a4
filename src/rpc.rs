//! # Control socket plumbing.
//!
//! The manager is driven at runtime over a UNIX-domain stream socket at
//! `<statedir>/rpc.sock`. The wire protocol is one request per connection:
//! a newline-terminated JSON object naming a method and a single string
//! argument, answered by one newline-terminated JSON reply.
//!
//! ```text
//! → {"Method": "list", "Arg": ""}
//! ← {"Ok": [{"Label": "org.example.httpd", "PID": "812", "LastExitStatus": 0}]}
//!
//! → {"Method": "unload", "Arg": "org.example.httpd"}
//! ← {"Error": "no job with label org.example.httpd"}
//! ```
//!
//! Method dispatch lives in the manager; this module only binds the socket
//! and frames requests and replies.

use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

/// Accept backlog for the control socket.
pub const RPC_BACKLOG: i32 = 1024;

/// One decoded control request.
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Registered method name.
    #[serde(rename = "Method")]
    pub method: String,
    /// Single string argument; empty when the method takes none.
    #[serde(rename = "Arg", default)]
    pub arg: String,
}

/// One control reply.
#[derive(Debug, Serialize, Deserialize)]
pub enum RpcReply {
    /// The method ran; its result follows.
    Ok(serde_json::Value),
    /// The method was rejected or failed.
    Error(String),
}

/// Binds the control socket, replacing any stale socket file.
pub fn bind(path: &Path) -> io::Result<UnixListener> {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale rpc socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    let listener = std::os::unix::net::UnixListener::bind(path)?;
    // std binds with a small default backlog; raise it.
    if unsafe { libc::listen(listener.as_raw_fd(), RPC_BACKLOG) } != 0 {
        return Err(io::Error::last_os_error());
    }
    listener.set_nonblocking(true)?;
    UnixListener::from_std(listener)
}

/// Removes the socket file after the listener has been dropped.
pub fn unlink(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "failed to unlink rpc socket");
        }
    }
}

/// Reads and decodes one request from a client connection.
pub async fn read_request(stream: &mut UnixStream) -> io::Result<RpcRequest> {
    let (reader, _writer) = stream.split();
    let mut line = String::new();
    BufReader::new(reader).read_line(&mut line).await?;
    serde_json::from_str(line.trim()).map_err(io::Error::from)
}

/// Encodes and writes one reply, then closes the write side.
pub async fn write_reply(stream: &mut UnixStream, reply: &RpcReply) -> io::Result<()> {
    let mut buf = serde_json::to_vec(reply)?;
    buf.push(b'\n');
    stream.write_all(&buf).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn request_and_reply_frame_over_a_stream() {
        let (mut client, mut server) = UnixStream::pair().unwrap();

        client
            .write_all(b"{\"Method\": \"list\", \"Arg\": \"\"}\n")
            .await
            .unwrap();
        let req = read_request(&mut server).await.unwrap();
        assert_eq!(req.method, "list");
        assert_eq!(req.arg, "");

        write_reply(&mut server, &RpcReply::Ok(serde_json::json!([])))
            .await
            .unwrap();
        let mut line = String::new();
        BufReader::new(&mut client).read_line(&mut line).await.unwrap();
        assert_eq!(line.trim(), "{\"Ok\":[]}");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn garbage_request_is_an_error() {
        let (mut client, mut server) = UnixStream::pair().unwrap();
        client.write_all(b"not json\n").await.unwrap();
        assert!(read_request(&mut server).await.is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn bind_replaces_a_stale_socket_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("rpc.sock");
        let first = bind(&path).unwrap();
        drop(first);
        // The file is still on disk; a fresh bind must succeed anyway.
        let second = bind(&path);
        assert!(second.is_ok());
        unlink(&path);
        assert!(!path.exists());
    }
}
