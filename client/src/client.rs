use crate::{Error, Result};
use dicearena_types::{
    api::{Action, Frame},
    dice::MatchRecord,
};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};
use url::Url;

/// Timeout for dialing and for waiting on a single frame.
pub const TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Resolve `path` against an `http(s)` base, switching the scheme to `ws(s)`.
pub(crate) fn ws_url(base_url: &str, path: &str) -> Result<Url> {
    let base_url = Url::parse(base_url)?;
    let ws_scheme = match base_url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        scheme => return Err(Error::InvalidScheme(scheme.to_string())),
    };
    let mut ws_url = base_url.join(path)?;
    ws_url
        .set_scheme(ws_scheme)
        .map_err(|_| Error::InvalidScheme(ws_scheme.to_string()))?;
    Ok(ws_url)
}

async fn dial(url: &Url) -> Result<Socket> {
    info!(%url, "connecting");
    let (socket, _) = timeout(TIMEOUT, connect_async(url.as_str()))
        .await
        .map_err(|_| Error::DialTimeout)??;
    Ok(socket)
}

/// Text payload of the next data frame; control frames are skipped.
async fn next_text(socket: &mut Socket, wait: Duration) -> Result<String> {
    loop {
        let message = timeout(wait, socket.next())
            .await
            .map_err(|_| Error::Timeout)?
            .ok_or(Error::ConnectionClosed)??;
        match message {
            Message::Text(text) => return Ok(text),
            Message::Binary(bytes) => {
                return String::from_utf8(bytes).map_err(|_| Error::UnexpectedResponse)
            }
            Message::Close(_) => return Err(Error::ConnectionClosed),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
}

/// One player's connection to `/ws/dice`.
pub struct Client {
    socket: Socket,
    wait: Duration,
}

impl Client {
    pub async fn connect(base_url: &str) -> Result<Self> {
        let url = ws_url(base_url, "/ws/dice")?;
        let socket = dial(&url).await?;
        Ok(Self {
            socket,
            wait: TIMEOUT,
        })
    }

    /// How long [Client::next_frame] waits before giving up.
    pub fn with_frame_timeout(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub async fn send(&mut self, action: &Action) -> Result<()> {
        let text = serde_json::to_string(action)?;
        debug!(action = action.name(), "sending");
        self.send_raw(&text).await
    }

    /// Send text as-is, valid or not.
    pub async fn send_raw(&mut self, text: &str) -> Result<()> {
        self.socket.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    pub async fn next_frame(&mut self) -> Result<Frame> {
        let text = next_text(&mut self.socket, self.wait).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Read frames until one satisfies `predicate`, discarding the rest.
    pub async fn wait_for(&mut self, mut predicate: impl FnMut(&Frame) -> bool) -> Result<Frame> {
        loop {
            let frame = self.next_frame().await?;
            if predicate(&frame) {
                return Ok(frame);
            }
            debug!(?frame, "skipping frame");
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.socket.close(None).await?;
        Ok(())
    }
}

/// Subscription to `/ws/history`.
pub struct HistoryStream {
    socket: Socket,
}

impl HistoryStream {
    pub async fn connect(base_url: &str) -> Result<Self> {
        let url = ws_url(base_url, "/ws/history")?;
        Ok(Self {
            socket: dial(&url).await?,
        })
    }

    pub async fn next_record(&mut self) -> Result<MatchRecord> {
        let text = next_text(&mut self.socket, TIMEOUT).await?;
        Ok(serde_json::from_str(&text)?)
    }
}
