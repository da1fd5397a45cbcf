//! Message types, payload validation, per-broadcast encoding cache, and
//! stream reading helpers.

pub mod cache;
pub mod stream;
pub mod types;
pub mod validator;

pub use cache::{CompressionMethod, SendCache};
pub use types::{close_code, CloseArgs, Message, Opcode, Payload};
