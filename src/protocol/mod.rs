//! Protocol Module
//!
//! Defines the wire protocol spoken with the OpalKV server.
//!
//! ## Frame Layout
//!
//! ```text
//! ┌──────────────┬─────────────────────────────────────┐
//! │ Body len (4) │        Tagged field body            │
//! └──────────────┴─────────────────────────────────────┘
//! ```
//!
//! Commands carry a name and an ordered string argument list; responses
//! carry at most one typed payload (`nil`, `int64`, `string`, `float64`
//! or `bytes`), an error string, and optional structured attributes. The
//! protocol is strictly pipelined: replies arrive in the order commands
//! were sent and there is no request-identifier multiplexing.
//!
//! See [`codec`] for the exact field tags.

mod command;
mod response;
pub mod codec;

pub use command::{Command, CommandKind};
pub use response::{AttrValue, Response, Value};
pub use codec::{
    decode_command, decode_response, encode_command, encode_response,
    read_command, read_frame, read_response, write_command, write_response,
};
