//! Interactive front end for local Parley users.
//!
//! [`Shell`] hosts several users of one relay and runs line commands
//! ([`Command`]) against whichever of them is active. The `parley` binary
//! wires it to stdin and stdout.

pub mod command;
pub mod shell;

pub use command::{Command, ParseError};
pub use shell::{Flow, Shell, ShellError};
