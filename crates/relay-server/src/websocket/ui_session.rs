//! UI socket lifecycle: snapshot on join, value-set requests, fan-out.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{Stream, StreamExt};
use metrics::{counter, histogram};
use relay_core::{DeviceValue, FrameError, UiRequest, decode_ui_request};
use tracing::field::Empty;
use tracing::{Instrument, Span, debug, info, instrument, warn};

use super::writer::{WriterExit, run_writer};
use super::{SessionContext, SessionEnd};
use crate::connection::Connection;
use crate::hub::{Hub, Origin};
use crate::metrics::{CONNECTION_DURATION_SECONDS, FRAME_ERRORS_TOTAL, UI_CONNECTIONS_TOTAL};

/// Run a UI session from upgrade through disconnect.
///
/// The UI receives an `init` snapshot first, then every `add`/`update`
/// broadcast while it is connected.
#[instrument(skip_all, fields(conn_id = Empty, %peer))]
pub async fn run_ui_session(socket: WebSocket, peer: SocketAddr, ctx: SessionContext) {
    let (connection, rx) = Connection::channel(Some(peer), ctx.queue_capacity);
    let _ = Span::current().record("conn_id", connection.id.as_str());
    counter!(UI_CONNECTIONS_TOTAL).increment(1);

    let _membership = ctx.hub.attach_ui(Arc::clone(&connection));

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(
        run_writer(sink, rx, Arc::clone(&connection), ctx.writer).instrument(Span::current()),
    );

    let end = tokio::select! {
        end = read_ui_frames(stream, &ctx.hub, &connection) => end,
        exit = &mut writer => SessionEnd::Writer(exit.unwrap_or(WriterExit::Panicked)),
        () = ctx.shutdown.cancelled() => SessionEnd::Shutdown,
    };
    writer.abort();

    histogram!(CONNECTION_DURATION_SECONDS, "role" => "ui").record(connection.age().as_secs_f64());
    if end.is_clean() {
        info!(reason = %end, dropped = connection.drop_count(), "ui session ended");
    } else {
        warn!(reason = %end, dropped = connection.drop_count(), "ui session ended abnormally");
    }
}

/// Read requests from a UI until the session should end.
///
/// Undecodable frames and unknown request tags are skipped.
pub async fn read_ui_frames<S, E>(mut stream: S, hub: &Hub, connection: &Connection) -> SessionEnd
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                connection.mark_alive();
                continue;
            }
            Ok(Message::Binary(data)) => {
                debug!(len = data.len(), "binary frame from ui");
                return SessionEnd::UnsupportedFrame;
            }
            Ok(Message::Close(_)) => return SessionEnd::Closed,
            Err(e) => return SessionEnd::ReadError(e.to_string()),
        };
        connection.mark_alive();

        match decode_ui_request(text.as_str()) {
            Ok(UiRequest::SetValue(DeviceValue { id, value })) => {
                let _ = hub.apply_value(id, value, Origin::Ui);
            }
            Err(e) => {
                counter!(FRAME_ERRORS_TOTAL, "kind" => e.kind()).increment(1);
                match e {
                    FrameError::UnknownTag(tag) => warn!(tag, "ignoring unknown ui request"),
                    other => warn!(error = %other, "ignoring malformed ui frame"),
                }
            }
        }
    }

    SessionEnd::Closed
}

#[cfg(test)]
mod tests {
    use std::io;

    use futures::stream;
    use relay_core::{Device, DeviceId};
    use tokio::sync::mpsc;

    use super::*;

    fn text(s: &str) -> Result<Message, io::Error> {
        Ok(Message::Text(s.into()))
    }

    fn hub_with_device() -> (Hub, mpsc::Receiver<Arc<String>>) {
        let hub = Hub::new();
        let (dev, rx) = Connection::channel(None, 8);
        let _ = hub.device_connected(Device::new(1, "fan", 0), dev);
        (hub, rx)
    }

    #[tokio::test]
    async fn set_value_request_reaches_device() {
        let (hub, mut dev_rx) = hub_with_device();
        let (ui, _ui_rx) = Connection::channel(None, 8);
        let frames = stream::iter(vec![text(r#"{"id":"value","payload":{"id":1,"value":80}}"#)]);

        assert_eq!(read_ui_frames(frames, &hub, &ui).await, SessionEnd::Closed);
        assert_eq!(dev_rx.try_recv().unwrap().as_str(), r#"{"value":80}"#);
        assert_eq!(hub.devices().get(DeviceId::new(1)).unwrap().value, 80);
    }

    #[tokio::test]
    async fn bad_frames_are_skipped() {
        let (hub, mut dev_rx) = hub_with_device();
        let (ui, _ui_rx) = Connection::channel(None, 8);
        let frames = stream::iter(vec![
            text(r#"{"id":"reboot","payload":{}}"#),
            text("{{{"),
            text(r#"{"id":"value","payload":{"id":1}}"#),
            text(r#"{"id":"value","payload":{"id":1,"value":7}}"#),
        ]);

        assert_eq!(read_ui_frames(frames, &hub, &ui).await, SessionEnd::Closed);
        assert_eq!(dev_rx.try_recv().unwrap().as_str(), r#"{"value":7}"#);
        assert!(dev_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn request_for_unknown_device_changes_nothing() {
        let (hub, mut dev_rx) = hub_with_device();
        let (ui, _ui_rx) = Connection::channel(None, 8);
        let frames = stream::iter(vec![text(r#"{"id":"value","payload":{"id":42,"value":1}}"#)]);

        assert_eq!(read_ui_frames(frames, &hub, &ui).await, SessionEnd::Closed);
        assert!(dev_rx.try_recv().is_err());
        assert_eq!(hub.devices().snapshot(), vec![Device::new(1, "fan", 0)]);
    }

    #[tokio::test]
    async fn binary_and_close_end_the_session() {
        let hub = Hub::new();
        let (ui, _ui_rx) = Connection::channel(None, 8);

        let binary = stream::iter(vec![Ok::<_, io::Error>(Message::Binary(vec![0].into()))]);
        assert_eq!(read_ui_frames(binary, &hub, &ui).await, SessionEnd::UnsupportedFrame);

        let close = stream::iter(vec![Ok::<_, io::Error>(Message::Close(None)), text("{}")]);
        assert_eq!(read_ui_frames(close, &hub, &ui).await, SessionEnd::Closed);
    }
}
