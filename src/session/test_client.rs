//! Scripted protocol client for tests.
//!
//! Talks to an agent over in-memory pipes using the same frames a real client
//! would send.

use crate::protocol::frame::{ReplyFrame, ServerFrame, ServerHello};
use crate::protocol::{Element, BASE_1_0};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

const PIPE_CAPACITY: usize = 64 * 1024;
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestClient {
    reader: BufReader<DuplexStream>,
    writer: DuplexStream,
}

impl TestClient {
    /// Returns the client plus the agent's input and output ends.
    pub fn new() -> (Self, DuplexStream, DuplexStream) {
        let (client_out, agent_in) = tokio::io::duplex(PIPE_CAPACITY);
        let (agent_out, client_in) = tokio::io::duplex(PIPE_CAPACITY);
        let client = Self {
            reader: BufReader::new(client_in),
            writer: client_out,
        };
        (client, agent_in, agent_out)
    }

    pub async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn send_hello(&mut self, capabilities: &[&str]) {
        let frame = serde_json::json!({ "hello": { "capabilities": capabilities } });
        self.send_line(&frame.to_string()).await;
    }

    pub async fn send_base_hello(&mut self) {
        self.send_hello(&[BASE_1_0]).await;
    }

    pub async fn send_rpc(&mut self, message_id: &str, operation: &str, content: Option<Element>) {
        let frame = serde_json::json!({
            "rpc": {
                "message-id": message_id,
                "operation": operation,
                "content": content,
            }
        });
        self.send_line(&frame.to_string()).await;
    }

    /// Closes the client's sending side; the agent sees end of input.
    pub async fn hang_up(&mut self) {
        self.writer.shutdown().await.unwrap();
    }

    pub async fn next_frame(&mut self) -> ServerFrame {
        self.try_next_frame(FRAME_TIMEOUT)
            .await
            .expect("no frame from agent")
    }

    /// Next frame, or `None` on timeout or end of output.
    pub async fn try_next_frame(&mut self, timeout: Duration) -> Option<ServerFrame> {
        let mut line = String::new();
        match tokio::time::timeout(timeout, self.reader.read_line(&mut line)).await {
            Ok(Ok(0)) | Err(_) => None,
            Ok(Ok(_)) => Some(serde_json::from_str(&line).expect("agent sent invalid frame")),
            Ok(Err(e)) => panic!("read from agent failed: {}", e),
        }
    }

    pub async fn next_hello(&mut self) -> ServerHello {
        match self.next_frame().await {
            ServerFrame::Hello(hello) => hello,
            other => panic!("expected hello, got {:?}", other),
        }
    }

    pub async fn next_reply(&mut self) -> ReplyFrame {
        match self.next_frame().await {
            ServerFrame::RpcReply(reply) => reply,
            other => panic!("expected rpc-reply, got {:?}", other),
        }
    }

    /// True once the agent closed its output.
    pub async fn output_closed(&mut self) -> bool {
        let mut line = String::new();
        matches!(
            tokio::time::timeout(FRAME_TIMEOUT, self.reader.read_line(&mut line)).await,
            Ok(Ok(0))
        )
    }
}
