//! Reply encoding.

use std::fmt;

use crate::driver::WavemeterInfo;
use crate::measurement::Reading;

/// SCPI-99 "not a number" sentinel.
pub const NAN_SENTINEL: &str = "9.91E+37";
pub const INFINITY_SENTINEL: &str = "9.9E+37";
pub const NEG_INFINITY_SENTINEL: &str = "-9.9E+37";

/// Value returned by a query handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Set commands and queries without a value.
    Empty,
    Number(Reading),
    Integer(i64),
    Text(String),
    /// Comma-separated values, e.g. one per channel of a channel list.
    List(Vec<Reply>),
}

impl Reply {
    /// Encode as the reply line body, without the trailing newline.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn from_bool(value: bool) -> Self {
        Reply::Integer(i64::from(value))
    }

    /// `*IDN?` reply: `HIGHFINESSE,<MODEL>,<SERIAL>,<REVISION>.<BUILD>`.
    pub fn identification(info: &WavemeterInfo) -> Self {
        Reply::Text(
            format!(
                "HighFinesse,{},{},{}.{}",
                info.model(),
                info.serial,
                info.revision,
                info.build
            )
            .to_ascii_uppercase(),
        )
    }
}

impl From<Reading> for Reply {
    fn from(value: Reading) -> Self {
        Reply::Number(value)
    }
}

impl From<u32> for Reply {
    fn from(value: u32) -> Self {
        Reply::Integer(i64::from(value))
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Empty => Ok(()),
            Reply::Number(reading) => match reading {
                Reading::Finite(value) => write!(f, "{}", value.normalize()),
                Reading::NaN => f.write_str(NAN_SENTINEL),
                Reading::Infinity => f.write_str(INFINITY_SENTINEL),
                Reading::NegInfinity => f.write_str(NEG_INFINITY_SENTINEL),
            },
            Reply::Integer(value) => write!(f, "{value}"),
            Reply::Text(text) => f.write_str(text),
            Reply::List(items) => {
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}
