//! Inbound frame classification. Malformed payloads are dropped silently;
//! nothing arriving on the push channel may crash the reconciliation loop.

use shared::protocol::PushFrame;
use tracing::debug;

pub fn parse_frame(text: &str) -> Option<PushFrame> {
    match serde_json::from_str::<PushFrame>(text) {
        Ok(frame) => Some(frame),
        Err(err) => {
            debug!("push: dropping unparsable frame: {err}");
            None
        }
    }
}
