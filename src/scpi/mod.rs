//! SCPI protocol layer.
//!
//! Requests arrive as newline-terminated lines. A line holds one or more
//! `;`-separated requests, each a header, an optional argument and an
//! optional `?` marking a query:
//!
//! ```text
//! *IDN?;MEAS:WAVE:CH? (@1:3);GET:SWIT 1
//! ```
//!
//! Every answered query produces exactly one reply line. Protocol errors are
//! written as `<code>,"<description>;<info>"`.

pub mod commands;
pub mod dispatcher;
pub mod encode;
pub mod mnemonic;
pub mod parser;

pub use commands::{Argument, Command, CommandTable, CommandTableBuilder};
pub use dispatcher::Dispatcher;
pub use encode::Reply;
pub use mnemonic::Mnemonic;
pub use parser::{split_line, Request};
