//! Interactive shell hosting several local users on one relay.

use std::{
    collections::BTreeMap,
    io::{self, BufRead, Write},
    sync::Arc,
};

use parley_core::{
    Client, ClientConfig, ClientError, Relay, SessionError, SessionStore, SystemEnv,
};
use thiserror::Error;
use tracing::debug;

use crate::command::{Command, HELP, ParseError};

/// Errors from a single shell command.
#[derive(Error, Debug)]
pub enum ShellError {
    /// Input could not be parsed
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Command needs an active user
    #[error("no active user, `register` or `use` one first")]
    NoActiveUser,

    /// User is not registered in this shell
    #[error("unknown local user `{0}`")]
    UnknownUser(String),

    /// User is already registered in this shell
    #[error("`{0}` is already registered here")]
    DuplicateUser(String),

    /// Protocol or relay failure
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Writing output failed
    #[error("output failed: {0}")]
    Io(#[from] io::Error),
}

/// Whether the read loop keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next line
    Continue,
    /// Stop reading
    Quit,
}

type LocalClient<R> = Client<SystemEnv, Arc<R>>;

/// Local users sharing one relay.
pub struct Shell<R: Relay> {
    relay: Arc<R>,
    config: ClientConfig,
    users: BTreeMap<String, LocalClient<R>>,
    active: Option<String>,
}

impl<R: Relay> Shell<R> {
    /// Shell with no users over `relay`.
    pub fn new(relay: Arc<R>, config: ClientConfig) -> Self {
        Self { relay, config, users: BTreeMap::new(), active: None }
    }

    /// Active user id, if any.
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Read commands from `input` until `quit` or end of input.
    ///
    /// Command failures are printed and do not stop the loop; I/O errors on
    /// `input` or `output` do.
    pub fn run(&mut self, input: impl BufRead, output: &mut impl Write) -> io::Result<()> {
        for line in input.lines() {
            let line = line?;
            match self.execute_line(&line, output) {
                Ok(Flow::Quit) => break,
                Ok(Flow::Continue) => {},
                Err(ShellError::Io(err)) => return Err(err),
                Err(err) => writeln!(output, "error: {err}")?,
            }
        }
        output.flush()
    }

    /// Parse and run one line.
    pub fn execute_line(&mut self, line: &str, output: &mut impl Write) -> Result<Flow, ShellError> {
        match Command::parse(line)? {
            Some(command) => self.execute(command, output),
            None => Ok(Flow::Continue),
        }
    }

    /// Run one command, printing results to `output`.
    pub fn execute(&mut self, command: Command, output: &mut impl Write) -> Result<Flow, ShellError> {
        debug!(?command, active = ?self.active, "executing command");
        match command {
            Command::Register { user } => {
                if self.users.contains_key(&user) {
                    return Err(ShellError::DuplicateUser(user));
                }
                let mut client = Client::new(
                    user.clone(),
                    SystemEnv::new(),
                    Arc::clone(&self.relay),
                    SessionStore::new(),
                    self.config.clone(),
                );
                let bundle = client.initialize()?;
                writeln!(
                    output,
                    "registered {user} with {} one-time prekeys",
                    bundle.one_time_pre_keys.len()
                )?;
                self.users.insert(user.clone(), client);
                self.active = Some(user);
            },
            Command::Use { user } => {
                if !self.users.contains_key(&user) {
                    return Err(ShellError::UnknownUser(user));
                }
                writeln!(output, "now acting as {user}")?;
                self.active = Some(user);
            },
            Command::Connect { peer } => {
                let session_id = self.current()?.connect(&peer)?;
                writeln!(output, "session {session_id} established")?;
            },
            Command::Send { peer, text } => {
                let client = self.current()?;
                let package = match client.send(&peer, text.as_bytes()) {
                    Err(err) if err.as_session().is_some_and(SessionError::requires_establishment) => {
                        let session_id = client.connect(&peer)?;
                        writeln!(output, "session {session_id} established")?;
                        client.send(&peer, text.as_bytes())?
                    },
                    result => result?,
                };
                writeln!(output, "sent #{} to {peer}", package.counter)?;
            },
            Command::Inbox => {
                let results = self.current_mut()?.receive()?;
                if results.is_empty() {
                    writeln!(output, "no new messages")?;
                }
                for result in results {
                    match result {
                        Ok(message) => writeln!(
                            output,
                            "[{} #{}] {}",
                            message.sender,
                            message.counter,
                            String::from_utf8_lossy(&message.plaintext)
                        )?,
                        Err(rejected) => writeln!(
                            output,
                            "rejected #{} from {}: {}",
                            rejected.package.counter, rejected.package.sender, rejected.error
                        )?,
                    }
                }
            },
            Command::Users => {
                let users = self.relay.list_users().map_err(ClientError::from)?;
                for user in users {
                    let marker = if self.active.as_deref() == Some(user.as_str()) { "*" } else { " " };
                    writeln!(output, "{marker} {user}")?;
                }
            },
            Command::Replenish => {
                let client = self.current_mut()?;
                client.replenish()?;
                writeln!(output, "{} one-time prekeys available", client.keyring().one_time_count())?;
            },
            Command::Save { path } => {
                let client = self.current()?;
                client.save_sessions(&path)?;
                writeln!(output, "saved {} sessions to {}", client.store().len(), path.display())?;
            },
            Command::Load { path } => {
                let client = self.current()?;
                client.load_sessions(&path)?;
                writeln!(output, "{} sessions after loading {}", client.store().len(), path.display())?;
            },
            Command::Help => writeln!(output, "{HELP}")?,
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn current(&self) -> Result<&LocalClient<R>, ShellError> {
        let user = self.active.as_ref().ok_or(ShellError::NoActiveUser)?;
        self.users.get(user).ok_or_else(|| ShellError::UnknownUser(user.clone()))
    }

    fn current_mut(&mut self) -> Result<&mut LocalClient<R>, ShellError> {
        let user = self.active.as_ref().ok_or(ShellError::NoActiveUser)?;
        self.users.get_mut(user).ok_or_else(|| ShellError::UnknownUser(user.clone()))
    }
}

#[cfg(test)]
mod tests {
    use parley_relay::{Mailbox, MemoryRelayStore, RelayConfig};

    use super::*;

    fn shell() -> Shell<Mailbox<MemoryRelayStore>> {
        let relay = Mailbox::new(MemoryRelayStore::new(), RelayConfig::default());
        Shell::new(Arc::new(relay), ClientConfig::default())
    }

    fn run(shell: &mut Shell<Mailbox<MemoryRelayStore>>, script: &str) -> String {
        let mut output = Vec::new();
        shell.run(script.as_bytes(), &mut output).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn conversation_between_local_users() {
        let mut shell = shell();
        let output = run(
            &mut shell,
            "register alice\nregister bob\nsend alice hi there\nuse alice\ninbox\nsend bob back\nuse bob\ninbox\n",
        );

        assert!(output.contains("registered alice with 5 one-time prekeys"), "{output}");
        assert!(output.contains("sent #1 to alice"), "{output}");
        assert!(output.contains("[bob #1] hi there"), "{output}");
        assert!(output.contains("sent #2 to bob"), "{output}");
        assert!(output.contains("[alice #2] back"), "{output}");
        assert_eq!(shell.active(), Some("bob"));
    }

    #[test]
    fn errors_do_not_stop_the_loop() {
        let mut shell = shell();
        let output = run(&mut shell, "inbox\nfly\nregister alice\nregister alice\nusers\n");

        assert!(output.contains("error: no active user"), "{output}");
        assert!(output.contains("error: unknown command `fly`"), "{output}");
        assert!(output.contains("error: `alice` is already registered here"), "{output}");
        assert!(output.contains("* alice"), "{output}");
    }

    #[test]
    fn quit_stops_reading() {
        let mut shell = shell();
        let output = run(&mut shell, "quit\nregister alice\n");
        assert!(output.is_empty());
        assert_eq!(shell.active(), None);
    }

    #[test]
    fn send_to_unknown_peer() {
        let mut shell = shell();
        run(&mut shell, "register bob\n");

        let err = shell.execute_line("send nobody hello", &mut Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            ShellError::Client(ClientError::Relay(parley_core::RelayError::NotFound { .. }))
        ));
    }

    #[test]
    fn save_and_load_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bob.cbor");
        let mut shell = shell();
        run(&mut shell, "register alice\nregister bob\nconnect alice\n");

        let output = run(&mut shell, &format!("save {}\nload {}\n", path.display(), path.display()));
        assert!(output.contains("saved 1 sessions"), "{output}");
        assert!(output.contains("1 sessions after loading"), "{output}");
    }
}
