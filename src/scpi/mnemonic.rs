//! SCPI long/short form header matching.
//!
//! A pattern such as `MEASure:WAVElength:CHannel` accepts, node by node,
//! either the uppercase prefix (`MEAS`) or the full node (`MEASURE`), in any
//! letter case. Common commands (`*IDN`) have a single form.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node {
    short: String,
    long: String,
}

impl Node {
    fn parse(pattern: &str) -> Self {
        let short: String = pattern
            .chars()
            .take_while(|c| !c.is_ascii_lowercase())
            .collect();
        Self {
            short,
            long: pattern.to_ascii_uppercase(),
        }
    }

    fn matches(&self, text: &str) -> bool {
        text.eq_ignore_ascii_case(&self.short) || text.eq_ignore_ascii_case(&self.long)
    }
}

/// Compiled command header pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mnemonic {
    pattern: String,
    nodes: Vec<Node>,
    common: bool,
}

impl Mnemonic {
    pub fn new(pattern: &str) -> Self {
        let pattern = pattern.trim_start_matches(':');
        let common = pattern.starts_with('*');
        let nodes = if common {
            vec![Node {
                short: pattern.to_ascii_uppercase(),
                long: pattern.to_ascii_uppercase(),
            }]
        } else {
            pattern.split(':').map(Node::parse).collect()
        };

        Self {
            pattern: pattern.to_string(),
            nodes,
            common,
        }
    }

    /// Pattern as written, e.g. `MEASure:TEMPerature`.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_common(&self) -> bool {
        self.common
    }

    /// Whether `header` (without `?`) names this command.
    pub fn matches(&self, header: &str) -> bool {
        let header = header.trim_start_matches(':');
        if self.common {
            return header.eq_ignore_ascii_case(&self.nodes[0].long);
        }

        let mut parts = header.split(':');
        let mut nodes = self.nodes.iter();
        loop {
            match (nodes.next(), parts.next()) {
                (Some(node), Some(part)) if node.matches(part) => {}
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_and_long_forms() {
        let mnemonic = Mnemonic::new("MEASure:WAVElength:CHannel");

        assert!(mnemonic.matches("MEAS:WAVE:CH"));
        assert!(mnemonic.matches("measure:wavelength:channel"));
        assert!(mnemonic.matches("Meas:WAVELENGTH:ch"));
        assert!(mnemonic.matches(":MEAS:WAVE:CH"));

        // Partial forms between short and long are not accepted
        assert!(!mnemonic.matches("MEASU:WAVE:CH"));
        assert!(!mnemonic.matches("MEAS:WAVE"));
        assert!(!mnemonic.matches("MEAS:WAVE:CH:EXTRA"));
    }

    #[test]
    fn test_all_uppercase_node() {
        let mnemonic = Mnemonic::new("GET:CHannel:COUNT");
        assert!(mnemonic.matches("get:ch:count"));
        assert!(mnemonic.matches("GET:CHANNEL:COUNT"));
        assert!(!mnemonic.matches("GET:CH:COUN"));
    }

    #[test]
    fn test_common_command() {
        let mnemonic = Mnemonic::new("*IDN");
        assert!(mnemonic.is_common());
        assert!(mnemonic.matches("*idn"));
        assert!(!mnemonic.matches("IDN"));
        assert!(!mnemonic.matches("*ID"));
        assert_eq!(mnemonic.to_string(), "*IDN");
    }
}
