//! WebSocket adapter for streaming sessions

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use dockscope_core::stream::Subscriber;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Pushes session output as text frames
pub struct WsSubscriber {
    sink: SplitSink<WebSocket, Message>,
}

impl WsSubscriber {
    /// Split `socket`; `session` is cancelled when the client closes its side
    pub fn attach(socket: WebSocket, session: CancellationToken) -> Self {
        let (sink, mut incoming) = socket.split();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = incoming.next() => match message {
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },
                    _ = session.cancelled() => return,
                }
            }
            debug!("WebSocket client went away");
            session.cancel();
        });

        Self { sink }
    }

    pub async fn close(mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
    }
}

#[async_trait]
impl Subscriber for WsSubscriber {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.sink
            .send(Message::Text(text))
            .await
            .context("WebSocket send failed")
    }
}
