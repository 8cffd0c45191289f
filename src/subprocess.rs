//! Shared helper for driving long-lived child processes over their standard
//! streams.
//!
//! Every wrapper in this crate exclusively owns its child: the handle here
//! guarantees that closing (or dropping) the wrapper terminates the child
//! and releases both streams, on error paths included.  `close` is
//! idempotent.

use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};

pub use self::error::Error;

mod error {
    /// Error type for subprocess handling.
    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not spawn {0}")]
        Spawn(String, #[source] std::io::Error),
        #[error("I/O error talking to {0}")]
        Io(String, #[source] std::io::Error),
        #[error("stream of {0} is already closed")]
        Closed(String),
    }
}

/// A child process with buffered pipes on stdin and stdout.
pub struct Subprocess {
    name: String,
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr_lines: Option<Arc<Mutex<Vec<String>>>>,
    stderr_thread: Option<std::thread::JoinHandle<()>>,
    closed: bool,
}

impl Subprocess {
    /// Spawn `program` with `args`.  When `capture_stderr` is set, a drain
    /// thread collects the child's stderr lines for later retrieval;
    /// otherwise stderr is inherited.
    pub fn spawn<P: AsRef<Path>>(
        program: P,
        args: &[String],
        capture_stderr: bool,
    ) -> Result<Self, Error> {
        let name = program.as_ref().display().to_string();
        let mut command = Command::new(program.as_ref());
        command.args(args).stdin(Stdio::piped()).stdout(Stdio::piped());
        if capture_stderr {
            command.stderr(Stdio::piped());
        } else {
            command.stderr(Stdio::inherit());
        }
        log::debug!("spawning {} {}", name, args.join(" "));
        let mut child = command
            .spawn()
            .map_err(|e| Error::Spawn(name.clone(), e))?;

        let stdin = child
            .stdin
            .take()
            .map(BufWriter::new)
            .ok_or_else(|| Error::Closed(name.clone()))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| Error::Closed(name.clone()))?;

        let (stderr_lines, stderr_thread) = if capture_stderr {
            let lines = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&lines);
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| Error::Closed(name.clone()))?;
            let handle = std::thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    sink.lock().expect("stderr sink is not poisoned").push(line);
                }
            });
            (Some(lines), Some(handle))
        } else {
            (None, None)
        };

        Ok(Self {
            name,
            child,
            stdin: Some(stdin),
            stdout: Some(stdout),
            stderr_lines,
            stderr_thread,
            closed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stdin(&mut self) -> Result<&mut BufWriter<ChildStdin>, Error> {
        self.stdin
            .as_mut()
            .ok_or_else(|| Error::Closed(self.name.clone()))
    }

    pub fn stdout(&mut self) -> Result<&mut BufReader<ChildStdout>, Error> {
        self.stdout
            .as_mut()
            .ok_or_else(|| Error::Closed(self.name.clone()))
    }

    /// Wrap an I/O error with the child's name.
    pub fn io_error(&self, e: std::io::Error) -> Error {
        Error::Io(self.name.clone(), e)
    }

    /// Drain the stderr lines collected so far.
    pub fn take_stderr_lines(&mut self) -> Vec<String> {
        match &self.stderr_lines {
            Some(lines) => std::mem::take(
                &mut *lines.lock().expect("stderr sink is not poisoned"),
            ),
            None => Vec::new(),
        }
    }

    /// Close both streams and terminate the child.  Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // streams first, in reverse order of acquisition
        self.stdout.take();
        self.stdin.take();
        if let Err(e) = self.child.kill() {
            log::debug!("could not kill {}: {}", self.name, e);
        }
        if let Err(e) = self.child.wait() {
            log::debug!("could not reap {}: {}", self.name, e);
        }
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Subprocess {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod test {
    use std::io::{BufRead as _, Write as _};

    use pretty_assertions::assert_eq;

    use super::Subprocess;

    #[test]
    fn round_trip_through_cat() -> Result<(), anyhow::Error> {
        let mut proc = Subprocess::spawn("cat", &[], false)?;
        {
            let stdin = proc.stdin()?;
            writeln!(stdin, "hello")?;
            stdin.flush()?;
        }
        let mut line = String::new();
        proc.stdout()?.read_line(&mut line)?;
        assert_eq!(line, "hello\n");
        proc.close();
        // closing twice is fine
        proc.close();
        assert!(proc.stdin().is_err());
        Ok(())
    }

    #[test]
    fn stderr_is_captured() -> Result<(), anyhow::Error> {
        let mut proc = Subprocess::spawn(
            "sh",
            &["-c".to_string(), "echo oops >&2; sleep 0.2".to_string()],
            true,
        )?;
        // reap the child so the drain thread has seen EOF
        std::thread::sleep(std::time::Duration::from_millis(400));
        let lines = proc.take_stderr_lines();
        assert_eq!(lines, vec!["oops".to_string()]);
        proc.close();
        Ok(())
    }

    #[test]
    fn spawn_failure_is_reported() {
        assert!(Subprocess::spawn("/no/such/binary", &[], false).is_err());
    }
}
