//! Device socket lifecycle: identify, accept pushes, release on close.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{Stream, StreamExt};
use metrics::{counter, histogram};
use relay_core::decode_device_hello;
use tracing::field::Empty;
use tracing::{Instrument, Span, debug, info, instrument, warn};

use super::writer::{WriterExit, run_writer};
use super::{SessionContext, SessionEnd};
use crate::connection::Connection;
use crate::hub::{DeviceRegistration, Hub};
use crate::metrics::{CONNECTION_DURATION_SECONDS, DEVICE_CONNECTIONS_TOTAL, FRAME_ERRORS_TOTAL};

/// Run a device session from upgrade through disconnect.
///
/// The device must open with a hello frame (`{"id":..,"description":..,"value":..}`).
/// Until it does, it is not registered and receives nothing. Any later frame
/// that is not a hello ends the session.
#[instrument(skip_all, fields(conn_id = Empty, %peer, device_id = Empty))]
pub async fn run_device_session(socket: WebSocket, peer: SocketAddr, ctx: SessionContext) {
    let (connection, rx) = Connection::channel(Some(peer), ctx.queue_capacity);
    let _ = Span::current().record("conn_id", connection.id.as_str());
    counter!(DEVICE_CONNECTIONS_TOTAL).increment(1);
    debug!("device socket accepted");

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(
        run_writer(sink, rx, Arc::clone(&connection), ctx.writer).instrument(Span::current()),
    );

    let end = tokio::select! {
        end = read_device_frames(stream, &ctx.hub, &connection) => end,
        exit = &mut writer => SessionEnd::Writer(exit.unwrap_or(WriterExit::Panicked)),
        () = ctx.shutdown.cancelled() => SessionEnd::Shutdown,
    };
    writer.abort();

    histogram!(CONNECTION_DURATION_SECONDS, "role" => "device")
        .record(connection.age().as_secs_f64());
    if end.is_clean() {
        info!(reason = %end, dropped = connection.drop_count(), "device session ended");
    } else {
        warn!(reason = %end, dropped = connection.drop_count(), "device session ended abnormally");
    }
}

/// Read frames from a device until the session should end.
///
/// The device stays registered for as long as this future is alive; dropping
/// it (completion, cancellation or panic) releases the registration.
pub async fn read_device_frames<S, E>(
    mut stream: S,
    hub: &Hub,
    connection: &Arc<Connection>,
) -> SessionEnd
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut registration: Option<DeviceRegistration> = None;

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                connection.mark_alive();
                continue;
            }
            Ok(Message::Binary(data)) => {
                debug!(len = data.len(), "binary frame from device");
                return SessionEnd::UnsupportedFrame;
            }
            Ok(Message::Close(_)) => return SessionEnd::Closed,
            Err(e) => return SessionEnd::ReadError(e.to_string()),
        };
        connection.mark_alive();

        let device = match decode_device_hello(text.as_str()) {
            Ok(device) => device,
            Err(e) => {
                counter!(FRAME_ERRORS_TOTAL, "kind" => e.kind()).increment(1);
                if registration.is_none() {
                    warn!(error = %e, "device did not identify itself");
                }
                return SessionEnd::Protocol(e);
            }
        };

        let id = device.id;
        let _ = hub.device_connected(device, Arc::clone(connection));
        if registration.as_ref().map(DeviceRegistration::device_id) != Some(id) {
            let _ = Span::current().record("device_id", id.get());
            // Replacing the guard releases any id this connection held before.
            registration = Some(DeviceRegistration::new(hub.clone(), id, connection.id.clone()));
        }
    }

    SessionEnd::Closed
}
