//! Line-oriented client protocol for the in-memory engine.
//!
//! One command per line, one response per line. Keys never contain spaces;
//! values may.

/// A parsed client command.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    /// Create a node, answered with `OK` or `EXISTS`.
    Create {
        /// Node key.
        key: &'a str,
        /// Node value.
        value: &'a str,
    },
    /// Read a node, answered with `VALUE <value>` or `NONE`.
    Get {
        /// Node key.
        key: &'a str,
    },
    /// Delete a node, answered with `OK` or `NONE`.
    Delete {
        /// Node key.
        key: &'a str,
    },
}

impl<'a> Command<'a> {
    /// Parses a single protocol line.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the line is not a valid command.
    pub fn parse(line: &'a str) -> Result<Self, &'static str> {
        let mut parts = line.trim().splitn(3, ' ');

        match parts.next() {
            Some("CREATE") => {
                let key = parts.next().filter(|key| !key.is_empty()).ok_or("missing key")?;
                let value = parts.next().ok_or("missing value")?;
                Ok(Self::Create { key, value })
            }
            Some("GET") => {
                let key = parts.next().filter(|key| !key.is_empty()).ok_or("missing key")?;
                if parts.next().is_some() {
                    return Err("unexpected argument");
                }
                Ok(Self::Get { key })
            }
            Some("DELETE") => {
                let key = parts.next().filter(|key| !key.is_empty()).ok_or("missing key")?;
                if parts.next().is_some() {
                    return Err("unexpected argument");
                }
                Ok(Self::Delete { key })
            }
            Some("") | None => Err("empty command"),
            Some(_) => Err("unknown command"),
        }
    }
}
