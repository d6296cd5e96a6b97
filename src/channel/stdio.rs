//! JSON-lines channel over standard input and output
//! Each line is one `{"event": ..., "payload": ...}` frame.

use async_trait::async_trait;
use log::{info, warn};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use tokio::sync::Mutex;

use crate::channel::{Frame, MessageChannel};
use crate::error::ChannelError;

pub struct StdioChannel {
    lines: Mutex<Lines<BufReader<Stdin>>>,
    stdout: Mutex<Stdout>,
}

impl StdioChannel {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for StdioChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageChannel for StdioChannel {
    async fn join(&self, topic: &str) -> Result<(), ChannelError> {
        info!("Joined to {} on stdio", topic);
        Ok(())
    }

    async fn push(&self, event: &str, payload: Value) -> Result<(), ChannelError> {
        let frame = Frame {
            event: event.to_string(),
            payload,
        };
        let mut line = serde_json::to_vec(&frame)?;
        line.push(b'\n');

        let mut stdout = self.stdout.lock().await;
        stdout
            .write_all(&line)
            .await
            .map_err(ChannelError::from_write)?;
        stdout.flush().await.map_err(ChannelError::from_write)?;
        Ok(())
    }

    async fn recv(&self) -> Option<Frame> {
        let mut lines = self.lines.lock().await;
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    warn!("Failed to read from stdin: {}", e);
                    return None;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Frame>(&line) {
                Ok(frame) => return Some(frame),
                Err(e) => warn!("Skipping unreadable frame {:?}: {}", line, e),
            }
        }
    }
}
