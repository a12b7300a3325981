//! Test support utilities shared across unit and integration tests.
//!
//! Every fake keeps its state behind an `Rc<RefCell<..>>`, so a test can hand
//! a clone to the code under test and inspect the recorded interactions on
//! the original afterwards.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::access::{AccessError, HttpFetcher, HttpResponse};
use crate::command::Command;
use crate::host::{CommandRunner, Host, HostError, ProcessOutput, ProcessRequest, files};
use crate::prompt::{PromptError, Prompter};

const NOT_FOUND_STATUS: i32 = 127;

fn output(code: Option<i32>, stdout: impl Into<String>, stderr: impl Into<String>) -> ProcessOutput {
    ProcessOutput {
        code,
        stdout: stdout.into().into_bytes(),
        stderr: stderr.into().into_bytes(),
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic process outcomes without spawning anything.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<Result<ProcessOutput, HostError>>>>,
    invocations: Rc<RefCell<Vec<ProcessRequest>>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all requests recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<ProcessRequest> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit process output.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .borrow_mut()
            .push_back(Ok(output(code, stdout, stderr)));
    }

    /// Pushes a runner failure, such as a spawn error or timeout.
    pub fn push_error(&self, error: HostError) {
        self.responses.borrow_mut().push_back(Err(error));
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, request: &ProcessRequest) -> Result<ProcessOutput, HostError> {
        self.invocations.borrow_mut().push(request.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| {
                Err(HostError::Spawn {
                    program: request.program.clone(),
                    message: String::from("no scripted response available"),
                })
            })
    }
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    output: ProcessOutput,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct HostState {
    rules: Vec<Rule>,
    lines: Vec<String>,
    stdins: Vec<Option<Vec<u8>>>,
    files: BTreeMap<String, Vec<u8>>,
    mirroring: bool,
    mirrors: Vec<(String, Utf8PathBuf)>,
}

/// In-memory [`Host`] that answers command lines by substring rules.
///
/// Rules are checked in registration order and the first live match wins.
/// Lines matching no rule exit with status 127. Remote files live in a map
/// that `send_file` writes and `receive_file` reads.
#[derive(Clone, Debug, Default)]
pub struct ScriptedHost {
    state: Rc<RefCell<HostState>>,
}

impl ScriptedHost {
    /// Creates a host with no rules and no files.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every line containing `pattern`.
    pub fn on(&self, pattern: &str, code: i32, stdout: &str, stderr: &str) {
        self.push_rule(pattern, code, stdout, stderr, None);
    }

    /// Answers the next line containing `pattern`, once.
    pub fn once(&self, pattern: &str, code: i32, stdout: &str, stderr: &str) {
        self.push_rule(pattern, code, stdout, stderr, Some(1));
    }

    /// Command lines executed so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.state.borrow().lines.clone()
    }

    /// Stdin payloads, one per executed line.
    #[must_use]
    pub fn stdins(&self) -> Vec<Option<Vec<u8>>> {
        self.state.borrow().stdins.clone()
    }

    /// Number of executed lines containing `pattern`.
    #[must_use]
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.state
            .borrow()
            .lines
            .iter()
            .filter(|line| line.contains(pattern))
            .count()
    }

    /// Seeds a remote file.
    pub fn put_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
        self.state
            .borrow_mut()
            .files
            .insert(path.to_owned(), contents.into());
    }

    /// Contents of a remote file.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.borrow().files.get(path).cloned()
    }

    /// Paths of every remote file, sorted.
    #[must_use]
    pub fn remote_files(&self) -> Vec<String> {
        self.state.borrow().files.keys().cloned().collect()
    }

    /// Makes [`Host::mirror`] succeed and record its arguments.
    pub fn enable_mirroring(&self) {
        self.state.borrow_mut().mirroring = true;
    }

    /// Recorded mirror requests.
    #[must_use]
    pub fn mirrors(&self) -> Vec<(String, Utf8PathBuf)> {
        self.state.borrow().mirrors.clone()
    }

    fn push_rule(&self, pattern: &str, code: i32, stdout: &str, stderr: &str, remaining: Option<usize>) {
        self.state.borrow_mut().rules.push(Rule {
            pattern: pattern.to_owned(),
            output: output(Some(code), stdout, stderr),
            remaining,
        });
    }

    fn answer(&self, line: &str) -> ProcessOutput {
        let mut state = self.state.borrow_mut();
        let rule = state
            .rules
            .iter_mut()
            .find(|rule| rule.remaining != Some(0) && line.contains(&rule.pattern));
        match rule {
            Some(found) => {
                if let Some(left) = found.remaining.as_mut() {
                    *left -= 1;
                }
                found.output.clone()
            }
            None => output(Some(NOT_FOUND_STATUS), "", "command not found"),
        }
    }
}

impl Host for ScriptedHost {
    fn transport(&self) -> &'static str {
        "scripted"
    }

    fn execute(&mut self, command: &mut Command) -> Result<(), HostError> {
        let line = command.full_command_line();
        let stdin = command.take_stdin()?;
        {
            let mut state = self.state.borrow_mut();
            state.lines.push(line.clone());
            state.stdins.push(stdin);
        }
        command.record_output(self.answer(&line));
        Ok(())
    }

    fn send_file(&mut self, local: &Utf8Path, remote: &str) -> Result<(), HostError> {
        let contents = files::read(local)?;
        self.put_file(remote, contents);
        Ok(())
    }

    fn receive_file(&mut self, remote: &str, local: &Utf8Path) -> Result<(), HostError> {
        let contents = self.file(remote).ok_or_else(|| HostError::Io {
            context: format!("receiving {remote}"),
            message: String::from("no such remote file"),
        })?;
        files::write(local, &contents)
    }

    fn supports_mirroring(&self) -> bool {
        self.state.borrow().mirroring
    }

    fn mirror(&mut self, remote: &str, local: &Utf8Path) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        if !state.mirroring {
            return Err(HostError::Unsupported {
                transport: "scripted",
                operation: "mirror",
            });
        }
        state.mirrors.push((remote.to_owned(), local.to_path_buf()));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PrompterState {
    confirms: VecDeque<bool>,
    selections: VecDeque<usize>,
    questions: Vec<String>,
    choices: Vec<Vec<String>>,
}

/// Prompter answering from queues and recording every question asked.
#[derive(Clone, Debug, Default)]
pub struct ScriptedPrompter {
    state: Rc<RefCell<PrompterState>>,
}

impl ScriptedPrompter {
    /// Creates a prompter with no queued answers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an answer for the next yes/no question.
    pub fn push_confirm(&self, answer: bool) {
        self.state.borrow_mut().confirms.push_back(answer);
    }

    /// Queues an index for the next selection.
    pub fn push_select(&self, index: usize) {
        self.state.borrow_mut().selections.push_back(index);
    }

    /// Questions asked so far, in order.
    #[must_use]
    pub fn questions(&self) -> Vec<String> {
        self.state.borrow().questions.clone()
    }

    /// Choice lists offered by selections so far.
    #[must_use]
    pub fn choices(&self) -> Vec<Vec<String>> {
        self.state.borrow().choices.clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&mut self, question: &str, _default: bool) -> Result<bool, PromptError> {
        let mut state = self.state.borrow_mut();
        state.questions.push(question.to_owned());
        state.confirms.pop_front().ok_or_else(|| PromptError::Cancelled {
            question: question.to_owned(),
        })
    }

    fn select(&mut self, question: &str, choices: &[String]) -> Result<usize, PromptError> {
        let mut state = self.state.borrow_mut();
        state.questions.push(question.to_owned());
        state.choices.push(choices.to_vec());
        if choices.is_empty() {
            return Err(PromptError::NoChoices {
                question: question.to_owned(),
            });
        }
        state.selections.pop_front().ok_or_else(|| PromptError::Cancelled {
            question: question.to_owned(),
        })
    }
}

/// One request observed by [`ScriptedHttp`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpRequest {
    /// Requested URL without query string.
    pub url: String,
    /// Query pairs in order.
    pub query: Vec<(String, String)>,
}

/// HTTP fetcher returning queued responses in FIFO order.
#[derive(Clone, Debug, Default)]
pub struct ScriptedHttp {
    responses: Rc<RefCell<VecDeque<Result<HttpResponse, AccessError>>>>,
    requests: Rc<RefCell<Vec<HttpRequest>>>,
}

impl ScriptedHttp {
    /// Creates a fetcher with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push_response(&self, status: u16, body: impl Into<String>) {
        self.responses.borrow_mut().push_back(Ok(HttpResponse {
            status,
            body: body.into(),
        }));
    }

    /// Queues a transport failure.
    pub fn push_error(&self, error: AccessError) {
        self.responses.borrow_mut().push_back(Err(error));
    }

    /// Requests observed so far.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.borrow().clone()
    }
}

impl HttpFetcher for ScriptedHttp {
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse, AccessError> {
        self.requests.borrow_mut().push(HttpRequest {
            url: url.to_owned(),
            query: query.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| {
                Err(AccessError::Http {
                    url: url.to_owned(),
                    status: None,
                    message: String::from("no scripted response available"),
                })
            })
    }
}
