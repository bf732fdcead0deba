//! One client connection: decode actions, run them, and keep the socket alive.

use crate::{registry::Outbound, Server};
use axum::extract::ws::{Message, WebSocket};
use dicearena_execution::{Backend, Effects, Error, ErrorKind, Player};
use dicearena_types::{
    api::{Action, Frame},
    dice::ConnectionId,
};
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use std::{fmt::Display, panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Serve one WebSocket until it closes, misses its read deadline, or panics.
pub async fn run<B: Backend>(socket: WebSocket, server: Arc<Server<B>>) {
    let (sink, stream) = socket.split();
    serve(sink, stream, server).await;
}

async fn serve<B, Si, St, E>(sink: Si, stream: St, server: Arc<Server<B>>)
where
    B: Backend,
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display + Send,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let timing = server.session_config();
    let (outbox, queue) = mpsc::unbounded_channel();
    let conn = server.registry().register(outbox.clone());
    info!(%conn, "client connected");

    tokio::spawn(write_loop(conn, sink, queue, timing.write_timeout));
    let heartbeat = tokio::spawn(heartbeat(outbox.clone(), timing.heartbeat_interval));

    let mut session = Session {
        conn,
        server: server.clone(),
        player: None,
    };
    let outcome = AssertUnwindSafe(session.read_loop(stream, &outbox, timing.read_timeout))
        .catch_unwind()
        .await;
    if outcome.is_err() {
        error!(%conn, "connection task panicked, closing connection");
    }

    heartbeat.abort();
    drop(outbox);
    server.registry().remove(conn);
    let effects = server.engine().disconnect(conn);
    server.deliver(effects);
    info!(%conn, "client disconnected");
}

/// Sole writer of a socket: frames and heartbeats are queued here so writes never interleave.
///
/// Returning drops the queue, which ends the read loop of the same connection.
async fn write_loop<S>(
    conn: ConnectionId,
    mut sink: S,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    write_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(outbound) = queue.recv().await {
        let message = match outbound {
            Outbound::Text(text) => Message::Text(text),
            Outbound::Ping => Message::Ping(Vec::new()),
        };
        match tokio::time::timeout(write_timeout, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(%conn, error = %e, "write failed");
                break;
            }
            Err(_) => {
                warn!(%conn, "write deadline exceeded");
                break;
            }
        }
    }
    drop(queue);
    let _ = tokio::time::timeout(write_timeout, sink.close()).await;
}

async fn heartbeat(outbox: mpsc::UnboundedSender<Outbound>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        if outbox.send(Outbound::Ping).is_err() {
            break;
        }
    }
}

struct Session<B> {
    conn: ConnectionId,
    server: Arc<Server<B>>,
    /// Set by the most recent successful create or join.
    player: Option<Arc<Player>>,
}

impl<B: Backend> Session<B> {
    async fn read_loop<St, E>(
        &mut self,
        mut stream: St,
        outbox: &mpsc::UnboundedSender<Outbound>,
        read_timeout: Duration,
    ) where
        St: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let conn = self.conn;
        loop {
            tokio::select! {
                _ = outbox.closed() => {
                    debug!(%conn, "writer stopped");
                    break;
                }
                next = tokio::time::timeout(read_timeout, stream.next()) => {
                    let message = match next {
                        Err(_) => {
                            info!(%conn, "read deadline missed");
                            break;
                        }
                        Ok(None) => break,
                        Ok(Some(Err(e))) => {
                            debug!(%conn, error = %e, "read failed");
                            break;
                        }
                        Ok(Some(Ok(message))) => message,
                    };
                    match message {
                        Message::Text(text) => self.handle(&text).await,
                        Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                            Ok(text) => self.handle(text).await,
                            Err(_) => self.reply(Frame::error("frames must be UTF-8 JSON")),
                        },
                        Message::Ping(_) | Message::Pong(_) => {}
                        Message::Close(_) => break,
                    }
                }
            }
        }
    }

    fn reply(&self, frame: Frame) {
        self.server.registry().send(self.conn, &frame);
    }

    async fn handle(&mut self, text: &str) {
        let conn = self.conn;
        let action = match Action::decode(text) {
            Ok(action) => action,
            Err(e) => {
                debug!(%conn, error = %e, "undecodable frame");
                self.reply(Frame::error(e));
                return;
            }
        };
        let name = action.name();
        match self.dispatch(action).await {
            Ok(effects) => self.server.deliver(effects),
            Err(e) => {
                match e.kind() {
                    ErrorKind::Storage => warn!(%conn, action = name, error = %e, "action failed"),
                    _ => debug!(%conn, action = name, error = %e, "action rejected"),
                }
                self.reply(Frame::error(e));
            }
        }
    }

    fn bound(&self) -> Result<&Arc<Player>, Error> {
        self.player.as_ref().ok_or(Error::NotBound)
    }

    async fn dispatch(&mut self, action: Action) -> Result<Effects, Error> {
        let conn = self.conn;
        let engine = self.server.engine();
        match action {
            Action::ListLobbies => Ok(Effects {
                messages: vec![(conn, engine.lobby_list())],
                lobbies_changed: false,
            }),
            Action::CreateLobby {
                target_score,
                token_type,
                bet_amount,
                wallet,
                first_name,
            } => {
                let (player, effects) = engine
                    .create_lobby(
                        conn,
                        &wallet,
                        &first_name,
                        target_score,
                        &token_type,
                        bet_amount,
                    )
                    .await?;
                self.player = Some(player);
                Ok(effects)
            }
            Action::JoinLobby {
                lobby_id,
                wallet,
                first_name,
            } => {
                let (player, effects) = engine
                    .join_lobby(conn, &lobby_id, &wallet, &first_name)
                    .await?;
                self.player = Some(player);
                Ok(effects)
            }
            Action::RollDice { lobby_id } => {
                self.bound()?;
                engine.roll_dice(conn, &lobby_id).await
            }
            Action::TerminateGame { lobby_id, winner } => {
                self.bound()?;
                engine.terminate(conn, &lobby_id, winner).await
            }
            Action::DeleteLobby { lobby_id } => {
                self.bound()?;
                engine.delete_lobby(conn, &lobby_id)
            }
            Action::ConfirmReady { lobby_id } => {
                self.bound()?;
                engine.confirm_ready(conn, &lobby_id)
            }
        }
    }
}
