//! Adapter keeping one authenticated library session per target.

use std::io::{self, Read};
use std::net::TcpStream;
use std::path::Path;
use std::thread;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use camino::Utf8Path;
use ssh2::Session;
use tracing::debug;

use super::{AdapterKind, SessionCache, SshAdapter, SshSettings, SshTarget};
use crate::command::Command;
use crate::host::{HostError, ProcessOutput, files};

const DRAIN_BACKOFF: Duration = Duration::from_millis(5);

/// Executes commands over a cached `ssh2` session.
pub struct SessionAdapter {
    target: SshTarget,
    session: Session,
}

impl SessionAdapter {
    /// Reuses the cached session for `target` or opens a new one.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Ssh`] when the connection, handshake or
    /// authentication fails.
    pub fn connect(
        target: &SshTarget,
        settings: &SshSettings,
        cache: &SessionCache,
    ) -> Result<Self, HostError> {
        if let Some(session) = cache.get(target) {
            debug!(target = %target, "reusing ssh session");
            return Ok(Self {
                target: target.clone(),
                session,
            });
        }
        let session = open_session(target, settings)?;
        cache.insert(target, session.clone());
        Ok(Self {
            target: target.clone(),
            session,
        })
    }

    fn error(&self, action: &str, err: impl std::fmt::Display) -> HostError {
        HostError::Ssh {
            target: self.target.key(),
            message: format!("{action}: {err}"),
        }
    }
}

fn open_session(target: &SshTarget, settings: &SshSettings) -> Result<Session, HostError> {
    let failure = |action: &str, err: &dyn std::fmt::Display| HostError::Ssh {
        target: target.key(),
        message: format!("{action}: {err}"),
    };

    let tcp = TcpStream::connect((target.host.as_str(), target.port))
        .map_err(|err| failure("connect", &err))?;
    let mut session = Session::new().map_err(|err| failure("create session", &err))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout_millis(settings.timeout));
    session
        .handshake()
        .map_err(|err| failure("handshake", &err))?;

    let auth = match &settings.identity_file {
        Some(identity) => {
            session.userauth_pubkey_file(&target.user, None, identity.as_std_path(), None)
        }
        None => session.userauth_agent(&target.user),
    };
    auth.map_err(|err| failure("authenticate", &err))?;

    if !session.authenticated() {
        return Err(failure("authenticate", &"server rejected the credentials"));
    }
    Ok(session)
}

fn timeout_millis(limit: Duration) -> u32 {
    u32::try_from(limit.as_millis()).unwrap_or(u32::MAX)
}

/// Feeds `payload` to `line` through a base64 pipe so arbitrary bytes reach
/// the remote program without quoting hazards.
pub(crate) fn inject_stdin(line: &str, payload: &[u8]) -> String {
    format!("printf %s '{}' | base64 -d | ( {line} )", STANDARD.encode(payload))
}

enum Chunk {
    Data,
    Pending,
    Eof,
}

fn read_chunk(source: &mut impl Read, buf: &mut [u8], sink: &mut Vec<u8>) -> io::Result<Chunk> {
    match source.read(buf) {
        Ok(0) => Ok(Chunk::Eof),
        Ok(count) => {
            sink.extend_from_slice(buf.get(..count).unwrap_or_default());
            Ok(Chunk::Data)
        }
        Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
            Ok(Chunk::Pending)
        }
        Err(err) => Err(err),
    }
}

/// Reads two non-blocking streams in turn until both reach end of file.
///
/// A remote writer blocked on a full stderr window only makes progress once
/// stderr is read, so neither stream may be read to completion first.
pub(crate) fn drain_both(
    stdout: &mut impl Read,
    stderr: &mut impl Read,
) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut buf = [0_u8; 16 * 1024];
    let mut out_open = true;
    let mut err_open = true;
    while out_open || err_open {
        let mut progressed = false;
        if out_open {
            match read_chunk(&mut *stdout, &mut buf, &mut out)? {
                Chunk::Data => progressed = true,
                Chunk::Pending => {}
                Chunk::Eof => out_open = false,
            }
        }
        if err_open {
            match read_chunk(&mut *stderr, &mut buf, &mut err)? {
                Chunk::Data => progressed = true,
                Chunk::Pending => {}
                Chunk::Eof => err_open = false,
            }
        }
        if !progressed && (out_open || err_open) {
            thread::sleep(DRAIN_BACKOFF);
        }
    }
    Ok((out, err))
}

impl SshAdapter for SessionAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Session
    }

    fn execute(&mut self, command: &mut Command) -> Result<(), HostError> {
        let line = command.full_command_line();
        let remote_line = match command.take_stdin()? {
            Some(payload) => inject_stdin(&line, &payload),
            None => line,
        };
        debug!(transport = "ssh", target = %self.target, line = %remote_line, "executing command");

        let mut channel = self
            .session
            .channel_session()
            .map_err(|err| self.error("open channel", err))?;
        channel
            .exec(&remote_line)
            .map_err(|err| self.error("exec", err))?;

        let mut errors = channel.stderr();
        self.session.set_blocking(false);
        let drained = drain_both(&mut channel, &mut errors);
        self.session.set_blocking(true);
        let (stdout, stderr) = drained.map_err(|err| self.error("read output", err))?;
        channel
            .wait_close()
            .map_err(|err| self.error("close channel", err))?;
        let code = channel
            .exit_status()
            .map_err(|err| self.error("exit status", err))?;

        command.record_output(ProcessOutput {
            code: Some(code),
            stdout,
            stderr,
        });
        Ok(())
    }

    fn send_file(&mut self, local: &Utf8Path, remote: &str) -> Result<(), HostError> {
        let sftp = self.session.sftp().map_err(|err| self.error("sftp", err))?;
        let mut source = files::open(local)?;
        let mut target = sftp
            .create(Path::new(remote))
            .map_err(|err| self.error(&format!("create {remote}"), err))?;
        io::copy(&mut source, &mut target)
            .map(|_| ())
            .map_err(|err| self.error(&format!("upload {remote}"), err))
    }

    fn receive_file(&mut self, remote: &str, local: &Utf8Path) -> Result<(), HostError> {
        let sftp = self.session.sftp().map_err(|err| self.error("sftp", err))?;
        let mut source = sftp
            .open(Path::new(remote))
            .map_err(|err| self.error(&format!("open {remote}"), err))?;
        let mut target = files::create(local)?;
        io::copy(&mut source, &mut target)
            .map(|_| ())
            .map_err(|err| self.error(&format!("download {remote}"), err))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::host::LocalHost;
    use rstest::rstest;

    #[rstest]
    fn injected_stdin_reaches_the_program_verbatim() {
        let payload = b"it's $HOME\n\"quoted\"\x00\xff".to_vec();
        let line = inject_stdin("cat", &payload);

        let mut command = Command::shell(line);
        command
            .run(&mut LocalHost::new())
            .expect("local shell should run");

        assert!(command.is_success());
        assert_eq!(command.stdout_bytes(), payload);
    }

    /// Reader that yields `chunks`, reporting `WouldBlock` while `gate`
    /// is closed.
    struct Gated {
        chunks: Vec<Vec<u8>>,
        gate: Rc<Cell<bool>>,
        opens_gate_at_eof: bool,
    }

    impl Read for Gated {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.opens_gate_at_eof && !self.gate.get() {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            if self.chunks.is_empty() {
                if self.opens_gate_at_eof {
                    self.gate.set(true);
                }
                return Ok(0);
            }
            let chunk = self.chunks.remove(0);
            let count = chunk.len().min(buf.len());
            buf.get_mut(..count)
                .unwrap_or_else(|| panic!("buffer too small"))
                .copy_from_slice(chunk.get(..count).unwrap_or_default());
            Ok(count)
        }
    }

    #[rstest]
    fn stdout_blocked_behind_stderr_is_still_collected() {
        let gate = Rc::new(Cell::new(false));
        let mut stdout = Gated {
            chunks: vec![b"done\n".to_vec()],
            gate: Rc::clone(&gate),
            opens_gate_at_eof: false,
        };
        let mut stderr = Gated {
            chunks: vec![vec![b'w'; 4096], vec![b'w'; 4096], b"warning\n".to_vec()],
            gate,
            opens_gate_at_eof: true,
        };

        let (out, err) = drain_both(&mut stdout, &mut stderr).expect("drain should finish");

        assert_eq!(out, b"done\n");
        assert_eq!(err.len(), 4096 * 2 + 8);
        assert!(err.ends_with(b"warning\n"));
    }

    #[rstest]
    fn drain_surfaces_read_errors() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("channel closed"))
            }
        }

        let err = drain_both(&mut Broken, &mut io::empty()).expect_err("error should surface");

        assert_eq!(err.to_string(), "channel closed");
    }

    #[rstest]
    #[case(Duration::from_secs(300), 300_000)]
    #[case(Duration::from_secs(u64::MAX), u32::MAX)]
    fn timeout_is_clamped_to_u32(#[case] limit: Duration, #[case] expected: u32) {
        assert_eq!(timeout_millis(limit), expected);
    }
}
