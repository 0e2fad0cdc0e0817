//! Line command parsing.

use std::path::PathBuf;

use thiserror::Error;

/// One line of shell input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a local user and publish their bundle
    Register {
        /// New user id
        user: String,
    },
    /// Make an existing local user the active one
    Use {
        /// Local user id
        user: String,
    },
    /// Establish a fresh session with a peer
    Connect {
        /// Remote user id
        peer: String,
    },
    /// Send a text message, connecting first if needed
    Send {
        /// Remote user id
        peer: String,
        /// Message text
        text: String,
    },
    /// Receive everything queued for the active user
    Inbox,
    /// List users registered with the relay
    Users,
    /// Refill the active user's one-time prekeys
    Replenish,
    /// Write the active user's sessions to a file
    Save {
        /// Snapshot file
        path: PathBuf,
    },
    /// Read sessions saved by `save`
    Load {
        /// Snapshot file
        path: PathBuf,
    },
    /// Print the command list
    Help,
    /// Leave the shell
    Quit,
}

/// Input that is not a valid command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// First word is not a command
    #[error("unknown command `{0}`, try `help`")]
    Unknown(String),

    /// Command is missing arguments
    #[error("usage: {0}")]
    Usage(&'static str),
}

/// Command summary printed by `help`.
pub const HELP: &str = "\
register <user>       create a local user and publish their bundle
use <user>            act as another local user
connect <peer>        establish a new session with <peer>
send <peer> <text>    send <text> to <peer>
inbox                 receive queued messages
users                 list registered users
replenish             refill one-time prekeys
save <path>           save sessions to <path>
load <path>           load sessions from <path>
quit                  exit";

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        let command = match word {
            "" => return Ok(None),
            "register" => Self::Register { user: single(rest, "register <user>")? },
            "use" => Self::Use { user: single(rest, "use <user>")? },
            "connect" => Self::Connect { peer: single(rest, "connect <peer>")? },
            "send" => {
                let (peer, text) = rest
                    .split_once(char::is_whitespace)
                    .ok_or(ParseError::Usage("send <peer> <text>"))?;
                Self::Send { peer: peer.to_string(), text: text.trim_start().to_string() }
            },
            "inbox" => Self::Inbox,
            "users" => Self::Users,
            "replenish" => Self::Replenish,
            "save" => Self::Save { path: path(rest, "save <path>")? },
            "load" => Self::Load { path: path(rest, "load <path>")? },
            "help" | "?" => Self::Help,
            "quit" | "q" | "exit" => Self::Quit,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn single(rest: &str, usage: &'static str) -> Result<String, ParseError> {
    let mut words = rest.split_whitespace();
    match (words.next(), words.next()) {
        (Some(word), None) => Ok(word.to_string()),
        _ => Err(ParseError::Usage(usage)),
    }
}

fn path(rest: &str, usage: &'static str) -> Result<PathBuf, ParseError> {
    if rest.is_empty() {
        return Err(ParseError::Usage(usage));
    }
    Ok(PathBuf::from(rest))
}
