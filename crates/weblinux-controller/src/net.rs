//! WebSocket transport for the relay client.

use web_sys::WebSocket;

use weblinux_relay::{RelayChannel, RelayError};

/// The live channel handed to the relay client once the socket opens.
pub(crate) struct WsChannel {
    ws: WebSocket,
}

impl WsChannel {
    pub fn new(ws: WebSocket) -> Self {
        Self { ws }
    }
}

impl RelayChannel for WsChannel {
    fn send(&mut self, text: &str) -> Result<(), RelayError> {
        self.ws
            .send_with_str(text)
            .map_err(|_| RelayError::ChannelDown)
    }
}
