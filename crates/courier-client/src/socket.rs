use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use courier_types::events::{ClientAction, ServerFrame};

use crate::backoff::reconnect_delay;
use crate::manager::{ClientInner, LinkState};

type Transport = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why the link loop ended.
enum LinkEnd {
    /// `disconnect` was called.
    Shutdown,
    /// The socket failed or the relay hung up; reconnect applies.
    Lost,
}

/// Resolves when `disconnect` sets the intentionally-closed flag. The watch
/// guard `wait_for` returns is dropped in here, never across an await in a
/// select handler, which keeps the driver future `Send`.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

/// Driver task: owns the socket for its whole life. Reconnects with
/// exponential backoff until told to shut down or the attempt cap is hit.
pub(crate) async fn run(inner: Arc<ClientInner>, url: String) {
    let mut shutdown = inner.shutdown_rx();
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        inner.set_state(LinkState::Connecting);
        match connect_async(url.as_str()).await {
            Ok((transport, _)) => {
                attempt = 0;
                inner.store_attempts(0);
                inner.set_state(LinkState::Open);
                // The URL can carry an auth token in its query, so it stays
                // out of the logs.
                info!("relay link open");

                match run_link(&inner, transport, &mut shutdown).await {
                    LinkEnd::Shutdown => break,
                    LinkEnd::Lost => warn!("relay link lost"),
                }
            }
            Err(err) => warn!("relay connect failed: {}", err),
        }

        if *shutdown.borrow() {
            break;
        }
        if attempt >= inner.config().max_reconnect_attempts {
            error!(
                "giving up on the relay after {} reconnect attempts; connect() starts over",
                attempt
            );
            break;
        }

        let delay = reconnect_delay(
            attempt,
            inner.config().base_reconnect_delay,
            inner.config().max_reconnect_delay,
        );
        attempt += 1;
        inner.store_attempts(attempt);
        debug!("reconnect attempt {} in {:?}", attempt, delay);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_requested(&mut shutdown) => break,
        }
    }

    inner.set_state(LinkState::Closed);
}

/// One socket's worth of I/O: drain the outbox, route inbound frames, keep
/// the heartbeat. Returns when the socket dies or shutdown is signalled.
async fn run_link(
    inner: &Arc<ClientInner>,
    transport: Transport,
    shutdown: &mut watch::Receiver<bool>,
) -> LinkEnd {
    let (mut sink, mut stream): (SplitSink<Transport, Message>, SplitStream<Transport>) =
        transport.split();

    let mut heartbeat = tokio::time::interval(inner.config().heartbeat_interval);
    heartbeat.tick().await;
    let mut pong_seen = true;
    let mut missed_pongs: u8 = 0;

    loop {
        // Drain the backlog before awaiting anything else, so sends queued
        // while closed always precede sends issued after the open.
        while let Some(action) = inner.pop_action() {
            let Some(frame) = encode(&action) else {
                continue;
            };
            if let Err(err) = sink.send(Message::text(frame)).await {
                warn!("relay write failed, requeueing: {}", err);
                inner.requeue_front(action);
                return LinkEnd::Lost;
            }
        }

        tokio::select! {
            _ = shutdown_requested(shutdown) => {
                let _ = sink.send(Message::Close(None)).await;
                return LinkEnd::Shutdown;
            }

            _ = inner.outbox_wake().notified() => {
                // Loop back around to the drain.
            }

            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(raw))) => match ServerFrame::parse(&raw) {
                    Ok(ServerFrame::Chat(event)) => inner.fan_out_chat(event),
                    Ok(ServerFrame::Notification(notification)) => {
                        if notification.is_pong() {
                            pong_seen = true;
                            missed_pongs = 0;
                        }
                        inner.fan_out_notification(notification);
                    }
                    Err(err) => {
                        warn!(
                            "dropping malformed relay frame: {} -- raw: {}",
                            err,
                            clip(raw.as_str())
                        );
                    }
                },
                // The transport answers protocol-level pings by itself; the
                // relay heartbeat is the JSON ping/pong above.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    info!("relay closed the connection");
                    return LinkEnd::Lost;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("relay read error: {}", err);
                    return LinkEnd::Lost;
                }
            },

            _ = heartbeat.tick() => {
                if pong_seen {
                    missed_pongs = 0;
                } else {
                    missed_pongs += 1;
                    let limit = inner.config().missed_pong_limit;
                    if limit > 0 && missed_pongs >= limit {
                        warn!(
                            "heartbeat timeout (missed {} pongs), recycling link",
                            missed_pongs
                        );
                        return LinkEnd::Lost;
                    }
                }
                pong_seen = false;

                let Some(ping) = encode(&ClientAction::Ping) else {
                    continue;
                };
                if let Err(err) = sink.send(Message::text(ping)).await {
                    warn!("heartbeat write failed: {}", err);
                    return LinkEnd::Lost;
                }
            }
        }
    }
}

fn encode(action: &ClientAction) -> Option<String> {
    match serde_json::to_string(action) {
        Ok(frame) => Some(frame),
        Err(err) => {
            error!("dropping unencodable action: {}", err);
            None
        }
    }
}

/// Cap a raw frame at 200 bytes for logging, backing off to the nearest
/// char boundary so an oversized junk frame cannot flood the log or panic
/// the slice.
fn clip(raw: &str) -> &str {
    if raw.len() <= 200 {
        return raw;
    }
    let mut end = 200;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    &raw[..end]
}
