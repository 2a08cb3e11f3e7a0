use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State as AxumState,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::AppState;
use crate::registry::{outbound_channel, Outbound};

pub(super) async fn upgrade(
    AxumState(state): AxumState<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let max_message_bytes = state.config.ws_max_message_bytes;
    ws.max_message_size(max_message_bytes)
        .max_frame_size(max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let id = state.mailbox.next_connection_id();
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = outbound_channel(state.config.outbound_capacity);
    let send_timeout = state.config.ws_send_timeout();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let message = match frame {
                Outbound::Text(text) => Message::Text(text.to_string()),
                Outbound::Ping => Message::Ping(Vec::new()),
                Outbound::Close => break,
            };
            match timeout(send_timeout, sink.send(message)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    debug!(conn = %id, ?err, "send failed, client disconnected");
                    break;
                }
                Err(_) => {
                    warn!(conn = %id, "send timed out, closing connection");
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    state.mailbox.opened(id, out_tx).await;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => state.mailbox.text(id, text).await,
                Some(Ok(Message::Binary(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    state.mailbox.text(id, text).await;
                }
                Some(Ok(Message::Pong(_))) => state.mailbox.pong(id).await,
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    debug!(conn = %id, ?err, "socket read failed");
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    state.mailbox.closed(id).await;
    writer.abort();
}
