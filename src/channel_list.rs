//! SCPI-99 channel lists.
//!
//! A channel list has the form `(@<item>,<item>,...)` where each item is
//! either a single channel number or an inclusive range `first:last`. Ranges
//! may run downwards (`(@6:4)` yields `6,5,4`). Order is preserved and
//! duplicates are kept, so the output matches the order in which the client
//! expects replies.
//!
//! See SCPI-99 Volume 1 "Syntax and Style", section 8.3.2.

use thiserror::Error;

use crate::error::ScpiError;

/// Upper bound on the number of channels a single list may expand to.
pub const MAX_CHANNELS: usize = 1024;

/// Reasons a channel list is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelListError {
    #[error("channel list must be enclosed in '(@' and ')': {0}")]
    NotEnclosed(String),

    #[error("empty channel list")]
    Empty,

    #[error("invalid channel '{0}'")]
    InvalidToken(String),

    #[error("channel list expands to more than {MAX_CHANNELS} channels")]
    TooLong,
}

impl From<ChannelListError> for ScpiError {
    fn from(err: ChannelListError) -> Self {
        let info = match err {
            ChannelListError::NotEnclosed(text) | ChannelListError::InvalidToken(text) => text,
            ChannelListError::Empty => String::new(),
            ChannelListError::TooLong => MAX_CHANNELS.to_string(),
        };
        ScpiError::InvalidSyntax(info)
    }
}

/// Parse a channel list into the ordered sequence of channel numbers.
///
/// Channel numbers are returned as written; no index adjustment is applied.
pub fn parse_channel_list(text: &str) -> Result<Vec<u32>, ChannelListError> {
    let text = text.trim();
    let body = text
        .strip_prefix("(@")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| ChannelListError::NotEnclosed(text.to_string()))?;

    if body.is_empty() {
        return Err(ChannelListError::Empty);
    }

    let mut channels = Vec::new();
    for token in body.split(',') {
        match token.split_once(':') {
            None => channels.push(parse_channel(token)?),
            Some((first, last)) => {
                let first = parse_channel(first).map_err(|_| invalid(token))?;
                let last = parse_channel(last).map_err(|_| invalid(token))?;
                let span = first.abs_diff(last) as usize + 1;
                if channels.len() + span > MAX_CHANNELS {
                    return Err(ChannelListError::TooLong);
                }
                if first <= last {
                    channels.extend(first..=last);
                } else {
                    channels.extend((last..=first).rev());
                }
            }
        }
        if channels.len() > MAX_CHANNELS {
            return Err(ChannelListError::TooLong);
        }
    }

    Ok(channels)
}

fn parse_channel(token: &str) -> Result<u32, ChannelListError> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(token));
    }
    token.parse().map_err(|_| invalid(token))
}

fn invalid(token: &str) -> ChannelListError {
    ChannelListError::InvalidToken(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discrete_channels_keep_order() {
        assert_eq!(parse_channel_list("(@1,2,4)").unwrap(), vec![1, 2, 4]);
        assert_eq!(parse_channel_list("(@4,1,4)").unwrap(), vec![4, 1, 4]);
        assert_eq!(parse_channel_list("(@7)").unwrap(), vec![7]);
    }

    #[test]
    fn test_ranges_expand_in_both_directions() {
        assert_eq!(parse_channel_list("(@6:4)").unwrap(), vec![6, 5, 4]);
        assert_eq!(parse_channel_list("(@4:6,9)").unwrap(), vec![4, 5, 6, 9]);
        assert_eq!(parse_channel_list("(@3:3)").unwrap(), vec![3]);
        assert_eq!(
            parse_channel_list("(@1,8:6,2:3)").unwrap(),
            vec![1, 8, 7, 6, 2, 3]
        );
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        assert_eq!(parse_channel_list("  (@1,2) ").unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_rejects_missing_enclosure() {
        for text in ["1,2", "(1,2)", "@1,2)", "(@1,2", "(@1,2))x", ""] {
            assert!(
                matches!(
                    parse_channel_list(text),
                    Err(ChannelListError::NotEnclosed(_))
                ),
                "accepted {text:?}"
            );
        }
    }

    #[test]
    fn test_rejects_bad_tokens() {
        for text in ["(@a)", "(@1,x)", "(@1:)", "(@:2)", "(@1:2:3)", "(@1,,2)", "(@-1)", "(@ 1)"] {
            assert!(
                matches!(
                    parse_channel_list(text),
                    Err(ChannelListError::InvalidToken(_))
                ),
                "accepted {text:?}"
            );
        }
    }

    #[test]
    fn test_rejects_empty_list() {
        assert_eq!(parse_channel_list("(@)"), Err(ChannelListError::Empty));
    }

    #[test]
    fn test_rejects_oversized_expansion() {
        assert_eq!(
            parse_channel_list("(@1:5000)"),
            Err(ChannelListError::TooLong)
        );
        assert_eq!(parse_channel_list("(@1:1024)").unwrap().len(), 1024);
        assert_eq!(
            parse_channel_list("(@1:1024,1)"),
            Err(ChannelListError::TooLong)
        );
    }

    #[test]
    fn test_error_maps_to_invalid_syntax() {
        let err: ScpiError = parse_channel_list("(@1,x)").unwrap_err().into();
        assert_eq!(err, ScpiError::InvalidSyntax("x".to_string()));
        assert_eq!(err.code(), -102);
    }
}
