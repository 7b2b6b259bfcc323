//! Defines how each transport style frames replies for the client.
//!
//! All three styles speak plain text frames: the client sends one utterance
//! per frame and receives the agent's reply.

use std::fmt;

/// Delivery style of a WebSocket endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStyle {
    /// Messages are processed inline in the receive loop, one at a time.
    Blocking,
    /// Each message is processed on its own task; one reply frame.
    ReactiveUni,
    /// Each message is processed on its own task; the reply is streamed as
    /// several frames.
    ReactiveMulti,
}

impl TransportStyle {
    pub const ALL: [TransportStyle; 3] = [
        TransportStyle::Blocking,
        TransportStyle::ReactiveUni,
        TransportStyle::ReactiveMulti,
    ];

    pub fn path(self) -> &'static str {
        match self {
            TransportStyle::Blocking => "/websocket-non-reactive/to/rest",
            TransportStyle::ReactiveUni => "/websocket-reactive-uni/to/rest",
            TransportStyle::ReactiveMulti => "/websocket-reactive-multi/to/rest",
        }
    }

    pub fn endpoint_name(self) -> &'static str {
        match self {
            TransportStyle::Blocking => "WebSocketNonReactiveEndpoint",
            TransportStyle::ReactiveUni => "WebSocketReactiveUniEndpoint",
            TransportStyle::ReactiveMulti => "WebSocketReactiveMultiEndpoint",
        }
    }

    /// Greeting sent as the first frame after the upgrade.
    pub fn greeting(self) -> String {
        format!("Connection opened in {}", self.endpoint_name())
    }

    /// Splits a reply into the frames this style sends.
    ///
    /// Concatenating the frames always yields the original reply.
    pub fn frames(self, reply: &str) -> Vec<String> {
        match self {
            TransportStyle::Blocking | TransportStyle::ReactiveUni => vec![reply.to_string()],
            TransportStyle::ReactiveMulti => {
                let chunks: Vec<String> = reply.split_inclusive(' ').map(String::from).collect();
                if chunks.is_empty() {
                    vec![String::new()]
                } else {
                    chunks
                }
            }
        }
    }
}

impl fmt::Display for TransportStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint_name())
    }
}
