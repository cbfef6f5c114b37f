//! WebSocket frame payloads

use serde::{Deserialize, Serialize};

/// Type of WebSocket frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
}

impl Opcode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Opcode::Text => "Text",
            Opcode::Binary => "Binary",
            Opcode::Ping => "Ping",
            Opcode::Pong => "Pong",
            Opcode::Close => "Close",
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Opcode::Text | Opcode::Binary)
    }
}

/// A single captured WebSocket frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketFrame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl WebSocketFrame {
    pub fn text(text: &str) -> Self {
        Self {
            opcode: Opcode::Text,
            payload: text.as_bytes().to_vec(),
        }
    }

    pub fn binary(data: Vec<u8>) -> Self {
        Self {
            opcode: Opcode::Binary,
            payload: data,
        }
    }

    /// Payload as text, if the frame is a text frame holding valid UTF-8
    pub fn payload_text(&self) -> Option<&str> {
        match self.opcode {
            Opcode::Text => std::str::from_utf8(&self.payload).ok(),
            _ => None,
        }
    }

    /// Try to parse the payload as JSON
    pub fn payload_json(&self) -> Option<serde_json::Value> {
        self.payload_text()
            .and_then(|text| serde_json::from_str(text).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_text_only_for_text_frames() {
        assert_eq!(WebSocketFrame::text("hi").payload_text(), Some("hi"));
        assert_eq!(WebSocketFrame::binary(b"hi".to_vec()).payload_text(), None);
    }

    #[test]
    fn test_payload_json() {
        let frame = WebSocketFrame::text(r#"{"token":"x"}"#);
        let json = frame.payload_json().unwrap();
        assert_eq!(json["token"], "x");
    }
}
