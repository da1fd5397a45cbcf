//! Payload validation rules, applied before any transport call.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::RegistryError;

use super::types::{close_code, CloseArgs, Opcode};

/// Maximum payload length of a control frame (ping, pong, close).
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Maximum close reason length (control payload minus the 2-byte code).
pub const MAX_CLOSE_REASON: usize = MAX_CONTROL_PAYLOAD - 2;

/// FIN bit | close opcode.
const CLOSE_FRAME_HEADER: u8 = 0x88;

/// Validates a custom ping message and returns its payload bytes.
pub fn validate_ping_message(message: &str) -> Result<Bytes, RegistryError> {
    let bytes = message.as_bytes();
    if bytes.len() > MAX_CONTROL_PAYLOAD {
        return Err(RegistryError::invalid(format!(
            "ping message is {} bytes; control frames allow at most {}",
            bytes.len(),
            MAX_CONTROL_PAYLOAD
        )));
    }
    Ok(Bytes::copy_from_slice(bytes))
}

/// Validates raw data for the given opcode.
///
/// Binary data of any length is accepted; text must be valid UTF-8.
pub fn validate_data(opcode: Opcode, data: &[u8]) -> Result<(), RegistryError> {
    if opcode == Opcode::Text {
        std::str::from_utf8(data)
            .map_err(|e| RegistryError::invalid(format!("text is not valid UTF-8: {e}")))?;
    }
    Ok(())
}

/// Validates a close status and reason supplied by a caller.
pub fn validate_close_args(args: &CloseArgs) -> Result<(), RegistryError> {
    if !(1000..=4999).contains(&args.code) {
        return Err(RegistryError::invalid(format!(
            "close code {} is outside 1000-4999",
            args.code
        )));
    }

    if args.code == close_code::MANDATORY_EXTENSION {
        return Err(RegistryError::invalid(
            "close code 1010 can only be sent by a client",
        ));
    }

    if args.code == close_code::NO_STATUS && !args.reason.is_empty() {
        return Err(RegistryError::invalid(
            "close code 1005 cannot carry a reason",
        ));
    }

    if args.reason.len() > MAX_CLOSE_REASON {
        return Err(RegistryError::invalid(format!(
            "close reason is {} bytes; at most {} allowed",
            args.reason.len(),
            MAX_CLOSE_REASON
        )));
    }

    Ok(())
}

/// Validates a probe wait time.
pub fn validate_wait_time(wait_time: Duration) -> Result<(), RegistryError> {
    if wait_time.is_zero() {
        return Err(RegistryError::invalid("wait time must be greater than zero"));
    }
    Ok(())
}

/// Builds an unmasked server-side close frame for `args`.
///
/// The reason is truncated on a character boundary if it would not fit
/// within the control-frame limit.
pub fn build_close_frame(args: &CloseArgs) -> Bytes {
    let mut payload = args.to_payload();
    if payload.len() > MAX_CONTROL_PAYLOAD {
        let mut end = MAX_CLOSE_REASON;
        while !args.reason.is_char_boundary(end) {
            end -= 1;
        }
        payload = CloseArgs::new(args.code, &args.reason[..end]).to_payload();
    }

    let mut frame = BytesMut::with_capacity(2 + payload.len());
    frame.put_u8(CLOSE_FRAME_HEADER);
    frame.put_u8(payload.len() as u8);
    frame.put_slice(&payload);
    frame.freeze()
}
