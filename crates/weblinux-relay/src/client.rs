//! The multiplexing relay client.

use std::collections::HashMap;

use weblinux_abi::poll;

use crate::conn::{CloseHandler, Connection, DataHandler, ErrorHandler};
use crate::frame::{Frame, FrameTag};
use crate::RelayError;

/// Transport seam. The browser glue implements this over a WebSocket; the
/// tests over a frame log.
pub trait RelayChannel {
    fn send(&mut self, text: &str) -> Result<(), RelayError>;
}

/// Channel lifecycle. Reconnection is single-flight: only the caller that
/// moves the state from `Down` to `Connecting` dials; everyone else shares
/// the outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Down,
    Connecting,
    Up,
}

#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Channel URL of the TCP-bridging proxy.
    pub url: String,
    /// Optional auth token, injected as a query parameter.
    pub token: Option<String>,
    /// Pending opens not answered within this window are rejected.
    pub open_timeout_ms: u64,
    /// Client-side cap; the proxy's own per-user caps stay authoritative.
    pub max_connections: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            open_timeout_ms: 10_000,
            max_connections: 64,
        }
    }
}

/// Outcome of inbound processing the embedder must act on (completing the
/// host call that waits on a pending open, for instance).
#[derive(Debug)]
pub enum RelayEvent {
    /// A pending open resolved.
    OpenCompleted {
        id: u32,
        result: Result<(), String>,
    },
    /// Payload arrived for an open id.
    Data { id: u32 },
    /// The id ended.
    Closed { id: u32 },
    /// The id faulted; the record survives for observation.
    Errored { id: u32, msg: String },
}

struct PendingOpen {
    started_at_ms: u64,
}

pub struct RelayClient<C: RelayChannel> {
    cfg: RelayConfig,
    channel: Option<C>,
    state: ChannelState,
    conns: HashMap<u32, Connection>,
    pending: HashMap<u32, PendingOpen>,
    next_id: u32,
}

impl<C: RelayChannel> RelayClient<C> {
    pub fn new(cfg: RelayConfig) -> Self {
        Self {
            cfg,
            channel: None,
            state: ChannelState::Down,
            conns: HashMap::new(),
            pending: HashMap::new(),
            next_id: 1,
        }
    }

    /// The URL to dial, with the auth token appended when configured.
    pub fn channel_url(&self) -> String {
        match &self.cfg.token {
            Some(token) if !token.is_empty() => {
                let sep = if self.cfg.url.contains('?') { '&' } else { '?' };
                format!("{}{}token={}", self.cfg.url, sep, token)
            }
            _ => self.cfg.url.clone(),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Claim the connect attempt. Returns true for the caller that should
    /// dial; false when a dial is already in flight or the channel is up.
    pub fn begin_connect(&mut self) -> bool {
        if self.state == ChannelState::Down {
            self.state = ChannelState::Connecting;
            true
        } else {
            false
        }
    }

    /// The dial succeeded; the channel is live.
    pub fn channel_ready(&mut self, channel: C) {
        self.channel = Some(channel);
        self.state = ChannelState::Up;
    }

    /// The dial failed; a later attempt may re-claim.
    pub fn connect_failed(&mut self) {
        self.channel = None;
        self.state = ChannelState::Down;
    }

    pub fn is_connected(&self) -> bool {
        self.state == ChannelState::Up
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// True when the id has no live record (never opened, closed locally,
    /// or marked closed by the peer or a channel loss).
    pub fn is_closed(&self, id: u32) -> bool {
        match self.conns.get(&id) {
            Some(conn) => conn.is_closed(),
            None => true,
        }
    }

    /// Request a connection to (host, port). The returned id is pending
    /// until an `opened` or `error` frame (or the timeout) resolves it.
    pub fn open(&mut self, host: &str, port: u16, now_ms: u64) -> Result<u32, RelayError> {
        if self.state != ChannelState::Up {
            return Err(RelayError::ChannelDown);
        }
        if self.conns.len() + self.pending.len() >= self.cfg.max_connections {
            return Err(RelayError::TooManyConnections(self.cfg.max_connections));
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let frame = Frame::open(id, host, port).encode();
        self.channel_mut()?.send(&frame)?;
        self.pending.insert(
            id,
            PendingOpen {
                started_at_ms: now_ms,
            },
        );
        Ok(id)
    }

    pub fn write(&mut self, id: u32, data: &[u8]) -> Result<usize, RelayError> {
        let conn = self
            .conns
            .get(&id)
            .ok_or(RelayError::UnknownConnection(id))?;
        if conn.is_closed() {
            return Err(RelayError::ConnectionClosed(id));
        }
        let frame = Frame::write(id, data).encode();
        self.channel_mut()?.send(&frame)?;
        Ok(data.len())
    }

    /// Drain up to `max` buffered bytes. An empty result on a closed
    /// connection reports the close instead.
    pub fn read(&mut self, id: u32, max: usize) -> Result<Vec<u8>, RelayError> {
        let conn = self
            .conns
            .get_mut(&id)
            .ok_or(RelayError::UnknownConnection(id))?;
        let bytes = conn.take(max);
        if bytes.is_empty() && conn.is_closed() {
            return Err(RelayError::ConnectionClosed(id));
        }
        Ok(bytes)
    }

    pub fn poll(&self, id: u32) -> i32 {
        match self.conns.get(&id) {
            Some(conn) => conn.poll(),
            None => poll::CLOSED,
        }
    }

    /// Close locally: tells the proxy and destroys the record (or the
    /// pending reservation).
    pub fn close(&mut self, id: u32) -> Result<(), RelayError> {
        let known = self.conns.remove(&id).is_some() | self.pending.remove(&id).is_some();
        if !known {
            return Err(RelayError::UnknownConnection(id));
        }
        if let Some(channel) = self.channel.as_mut() {
            channel.send(&Frame::close(id).encode())?;
        }
        Ok(())
    }

    pub fn on_data(&mut self, id: u32, handler: DataHandler) -> Result<(), RelayError> {
        self.conns
            .get_mut(&id)
            .ok_or(RelayError::UnknownConnection(id))?
            .set_data_handler(handler);
        Ok(())
    }

    pub fn on_close(&mut self, id: u32, handler: CloseHandler) -> Result<(), RelayError> {
        self.conns
            .get_mut(&id)
            .ok_or(RelayError::UnknownConnection(id))?
            .set_close_handler(handler);
        Ok(())
    }

    pub fn on_error(&mut self, id: u32, handler: ErrorHandler) -> Result<(), RelayError> {
        self.conns
            .get_mut(&id)
            .ok_or(RelayError::UnknownConnection(id))?
            .set_error_handler(handler);
        Ok(())
    }

    /// Process one inbound channel frame.
    ///
    /// `Err` means the frame was unusable; the caller logs it and leaves
    /// the channel alive. `Ok(None)` covers benign races (data for an id
    /// closed moments ago).
    pub fn handle_frame(&mut self, text: &str) -> Result<Option<RelayEvent>, RelayError> {
        let frame = Frame::decode(text)?;
        match frame.tag {
            FrameTag::Opened => {
                if self.pending.remove(&frame.id).is_none() {
                    return Err(RelayError::Protocol(format!(
                        "opened for unknown id {}",
                        frame.id
                    )));
                }
                self.conns.insert(frame.id, Connection::new());
                Ok(Some(RelayEvent::OpenCompleted {
                    id: frame.id,
                    result: Ok(()),
                }))
            }
            FrameTag::Error => {
                let msg = frame.msg.unwrap_or_else(|| "remote error".to_string());
                if self.pending.remove(&frame.id).is_some() {
                    return Ok(Some(RelayEvent::OpenCompleted {
                        id: frame.id,
                        result: Err(msg),
                    }));
                }
                match self.conns.get_mut(&frame.id) {
                    Some(conn) => {
                        conn.mark_errored(&msg);
                        Ok(Some(RelayEvent::Errored { id: frame.id, msg }))
                    }
                    None => Err(RelayError::Protocol(format!(
                        "error for unknown id {}",
                        frame.id
                    ))),
                }
            }
            FrameTag::Data => {
                let bytes = frame.payload_bytes()?;
                match self.conns.get_mut(&frame.id) {
                    Some(conn) => {
                        conn.push_data(&bytes);
                        Ok(Some(RelayEvent::Data { id: frame.id }))
                    }
                    // Raced with a local close; drop silently.
                    None => Ok(None),
                }
            }
            FrameTag::Closed => match self.conns.get_mut(&frame.id) {
                Some(conn) => {
                    conn.mark_closed();
                    Ok(Some(RelayEvent::Closed { id: frame.id }))
                }
                None => Ok(None),
            },
            FrameTag::Open | FrameTag::Write | FrameTag::Close => Err(RelayError::Protocol(
                format!("client-bound tag {:?} received", frame.tag),
            )),
        }
    }

    /// Reject pending opens older than the configured window.
    pub fn expire_pending(&mut self, now_ms: u64) -> Vec<RelayEvent> {
        let timeout = self.cfg.open_timeout_ms;
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| now_ms.saturating_sub(p.started_at_ms) >= timeout)
            .map(|(&id, _)| id)
            .collect();
        expired
            .into_iter()
            .map(|id| {
                self.pending.remove(&id);
                RelayEvent::OpenCompleted {
                    id,
                    result: Err("open timed out".to_string()),
                }
            })
            .collect()
    }

    /// The channel went away: reject every pending open and mark every
    /// open connection closed, firing each close handler once.
    pub fn channel_lost(&mut self) -> Vec<RelayEvent> {
        self.channel = None;
        self.state = ChannelState::Down;

        let mut events = Vec::new();
        for (id, _) in self.pending.drain() {
            events.push(RelayEvent::OpenCompleted {
                id,
                result: Err("channel closed".to_string()),
            });
        }
        for (&id, conn) in self.conns.iter_mut() {
            if !conn.is_closed() {
                conn.mark_closed();
                events.push(RelayEvent::Closed { id });
            }
        }
        events
    }

    fn channel_mut(&mut self) -> Result<&mut C, RelayError> {
        self.channel.as_mut().ok_or(RelayError::ChannelDown)
    }
}
