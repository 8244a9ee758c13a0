//! Channel catalog handling.
//!
//! Loads the ordered channel list and exposes a circular cursor over it.
//! The scheduler only ever asks for the current channel and advances the
//! cursor at rotation time.

use std::path::{Path, PathBuf};

/// A single tunable channel: a display name and its broadcast frequency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    /// Tuning frequency in Hz.
    pub frequency: u32,
}

/// Ordered, circular list of channels with a cursor.
///
/// Invariant: never empty. `advance` wraps to the first entry after the last.
#[derive(Debug, Clone)]
pub struct ChannelCatalog {
    channels: Vec<Channel>,
    cursor: usize,
}

impl ChannelCatalog {
    /// Build a catalog from an ordered list of channels.
    /// The first entry becomes the initial current channel.
    pub fn new(channels: Vec<Channel>) -> Result<Self, ChannelError> {
        if channels.is_empty() {
            return Err(ChannelError::Empty);
        }
        Ok(ChannelCatalog {
            channels,
            cursor: 0,
        })
    }

    /// Load a catalog from a zap-style channels file.
    ///
    /// Each line is `NAME:FREQUENCY[:...]`; blank lines and `#` comments are
    /// skipped, and any fields after the frequency are ignored.
    pub fn load(path: &Path) -> Result<Self, ChannelError> {
        let content = std::fs::read_to_string(path).map_err(|e| ChannelError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut channels = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            channels.push(parse_line(line).map_err(|message| ChannelError::ParseError {
                path: path.to_path_buf(),
                line: idx + 1,
                message,
            })?);
        }

        ChannelCatalog::new(channels)
    }

    /// The channel the cursor points at.
    pub fn current(&self) -> &Channel {
        &self.channels[self.cursor]
    }

    /// Move the cursor to the next channel, wrapping after the last entry.
    /// Returns the new current channel.
    pub fn advance(&mut self) -> &Channel {
        self.cursor = (self.cursor + 1) % self.channels.len();
        self.current()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }
}

/// Parse one `NAME:FREQUENCY[:...]` line.
fn parse_line(line: &str) -> Result<Channel, String> {
    let mut fields = line.split(':');

    let name = fields
        .next()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| "missing channel name".to_string())?;

    let frequency_field = fields
        .next()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| format!("missing frequency for channel '{}'", name))?;

    let frequency: u32 = frequency_field
        .parse()
        .map_err(|_| format!("invalid frequency '{}' for channel '{}'", frequency_field, name))?;

    Ok(Channel {
        name: name.to_string(),
        frequency,
    })
}

/// Errors that can occur when loading the channel list.
#[derive(Debug)]
pub enum ChannelError {
    /// The channel list contained no channels
    Empty,
    /// Failed to read the channels file
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    /// A line in the channels file could not be parsed
    ParseError {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Empty => {
                write!(f, "Channel list is empty. At least one channel is required.")
            }
            ChannelError::IoError { path, source } => {
                write!(
                    f,
                    "Failed to read channels file '{}': {}",
                    path.display(),
                    source
                )
            }
            ChannelError::ParseError {
                path,
                line,
                message,
            } => {
                write!(
                    f,
                    "Failed to parse channels file '{}' at line {}: {}",
                    path.display(),
                    line,
                    message
                )
            }
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelError::IoError { source, .. } => Some(source),
            _ => None,
        }
    }
}
