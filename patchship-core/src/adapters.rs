//! Default port implementations: shell subprocesses, HTTP probe, filesystem writes,
//! and a scripted runner for embedding and testing.

use crate::ports::{HealthProbe, ProbeResult, ProcessOutput, ProcessRunner, WritePort};
use anyhow::Context;
use camino::Utf8Path;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long output is still collected after the child is gone. A background
/// process started by the child can hold the pipes open indefinitely.
const READER_GRACE: Duration = Duration::from_millis(200);

/// Runs commands as real subprocesses, killing them after `timeout`.
///
/// Terminal prompts from git are disabled so a missing credential fails fast
/// instead of hanging. Tools run under the C locale so their English output
/// (`nothing to commit`, `Everything up-to-date`) can be matched.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    pub timeout: Duration,
    pub env: Vec<(String, String)>,
}

impl ShellRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl ProcessRunner for ShellRunner {
    fn run(&self, cwd: &Utf8Path, program: &str, args: &[String]) -> anyhow::Result<ProcessOutput> {
        debug!(program, ?args, cwd = %cwd, "spawning");

        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .env("LANGUAGE", "")
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn `{}`", program))?;

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let started = Instant::now();
        let (code, timed_out) = loop {
            match child
                .try_wait()
                .with_context(|| format!("wait for `{}`", program))?
            {
                Some(status) => break (status.code(), false),
                None if started.elapsed() >= self.timeout => {
                    warn!(
                        program,
                        timeout_secs = self.timeout.as_secs_f64(),
                        "command timed out, killing"
                    );
                    let _ = child.kill();
                    let _ = child.wait();
                    break (None, true);
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        // Only the direct child is killed. A grandchild that inherited the
        // pipes keeps them open, so collection stops at a deadline instead of
        // waiting for EOF.
        let grace = Instant::now() + READER_GRACE;
        let deadline = if timed_out {
            grace
        } else {
            grace.max(started + self.timeout)
        };

        Ok(ProcessOutput {
            code,
            stdout: stdout
                .map(|rx| collect_output(rx, deadline))
                .unwrap_or_default(),
            stderr: stderr
                .map(|rx| collect_output(rx, deadline))
                .unwrap_or_default(),
            timed_out,
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// Gather chunks until the writer side closes or `deadline` passes.
fn collect_output(rx: Receiver<Vec<u8>>, deadline: Instant) -> String {
    let mut buf = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(chunk) => buf.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                while let Ok(chunk) = rx.try_recv() {
                    buf.extend_from_slice(&chunk);
                }
                debug!("output pipe still open after child exit, detaching reader");
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Blocking HTTP GET probe.
#[derive(Debug, Clone, Default)]
pub struct HttpHealthProbe {
    /// Bypass `HTTP(S)_PROXY` settings.
    pub direct: bool,
}

impl HttpHealthProbe {
    pub fn direct() -> Self {
        Self { direct: true }
    }
}

impl HealthProbe for HttpHealthProbe {
    fn probe(&self, url: &str, timeout: Duration) -> ProbeResult {
        let mut builder = reqwest::blocking::Client::builder().timeout(timeout);
        if self.direct {
            builder = builder.no_proxy();
        }
        let client = match builder.build() {
            Ok(c) => c,
            Err(e) => {
                return ProbeResult::Unreachable {
                    message: e.to_string(),
                };
            }
        };

        match client.get(url).send() {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().unwrap_or_default();
                if status.is_success() {
                    ProbeResult::Healthy {
                        status: status.as_u16(),
                        body,
                    }
                } else {
                    ProbeResult::Unhealthy {
                        status: status.as_u16(),
                        body,
                    }
                }
            }
            Err(e) if e.is_timeout() => ProbeResult::TimedOut,
            Err(e) => ProbeResult::Unreachable {
                message: e.to_string(),
            },
        }
    }
}

/// Filesystem write operations.
#[derive(Debug, Clone, Default)]
pub struct FsWritePort;

impl WritePort for FsWritePort {
    fn write_file(&self, path: &Utf8Path, contents: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)
                .with_context(|| format!("create parent dir for {}", path))?;
        }
        fs_err::write(path, contents).with_context(|| format!("write {}", path))
    }

    fn create_dir_all(&self, path: &Utf8Path) -> anyhow::Result<()> {
        fs_err::create_dir_all(path).with_context(|| format!("create_dir_all {}", path))
    }
}

/// In-memory runner for embedding and testing.
///
/// Responses are matched by command-line prefix (`"git push origin"`), first
/// registered match wins; unmatched commands succeed with empty output.
/// Every invocation is recorded as a single space-joined command line.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Vec<(String, ProcessOutput)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, prefix: impl Into<String>, output: ProcessOutput) -> Self {
        self.responses.push((prefix.into(), output));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn was_called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(&self, _cwd: &Utf8Path, program: &str, args: &[String]) -> anyhow::Result<ProcessOutput> {
        let line = std::iter::once(program)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(line.clone());
        }

        let output = self
            .responses
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| ProcessOutput::ok(""));
        Ok(output)
    }
}

/// Probe that replays fixed results in order, repeating the last one.
#[derive(Debug)]
pub struct ScriptedProbe {
    results: Vec<ProbeResult>,
    calls: Mutex<usize>,
}

impl ScriptedProbe {
    pub fn new(results: Vec<ProbeResult>) -> Self {
        Self {
            results,
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().map(|c| *c).unwrap_or_default()
    }
}

impl HealthProbe for ScriptedProbe {
    fn probe(&self, _url: &str, _timeout: Duration) -> ProbeResult {
        let n = match self.calls.lock() {
            Ok(mut calls) => {
                *calls += 1;
                *calls
            }
            Err(_) => 1,
        };
        self.results
            .get(n - 1)
            .or_else(|| self.results.last())
            .cloned()
            .unwrap_or(ProbeResult::Unreachable {
                message: "no scripted result".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use std::io::Write;
    use std::net::TcpListener;
    use tempfile::TempDir;

    fn temp_root() -> (TempDir, Utf8PathBuf) {
        let temp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
        (temp, root)
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn scripted_runner_matches_first_prefix() {
        let runner = ScriptedRunner::new()
            .on("git checkout -b", ProcessOutput::failed(128, "already exists"))
            .on("git checkout", ProcessOutput::ok("switched"));

        let root = Utf8Path::new(".");
        let out = runner
            .run(root, "git", &args(&["checkout", "-b", "fix"]))
            .unwrap();
        assert!(!out.success());
        let out = runner.run(root, "git", &args(&["checkout", "fix"])).unwrap();
        assert!(out.success());
        let out = runner.run(root, "heroku", &args(&["restart"])).unwrap();
        assert!(out.success());

        assert_eq!(
            runner.calls(),
            vec!["git checkout -b fix", "git checkout fix", "heroku restart"]
        );
        assert!(runner.was_called("heroku"));
    }

    #[test]
    fn scripted_probe_repeats_last_result() {
        let probe = ScriptedProbe::new(vec![ProbeResult::TimedOut]);
        assert_eq!(probe.probe("u", Duration::ZERO), ProbeResult::TimedOut);
        assert_eq!(probe.probe("u", Duration::ZERO), ProbeResult::TimedOut);
        assert_eq!(probe.calls(), 2);
    }

    #[test]
    fn fs_write_port_writes_and_creates_dirs() {
        let (_temp, root) = temp_root();
        let target = root.join("nested").join("run.json");

        let port = FsWritePort;
        port.write_file(&target, b"{}").expect("write");
        assert_eq!(std::fs::read_to_string(&target).expect("read"), "{}");

        let extra_dir = root.join("extra");
        port.create_dir_all(&extra_dir).expect("mkdir");
        assert!(extra_dir.exists());
    }

    #[cfg(unix)]
    #[test]
    fn shell_runner_captures_output_and_exit_code() {
        let (_temp, root) = temp_root();
        let runner = ShellRunner::new(Duration::from_secs(10));

        let out = runner
            .run(&root, "sh", &args(&["-c", "echo hi; echo oops >&2; exit 3"]))
            .expect("run");
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.diagnostic(), "oops");
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[test]
    fn shell_runner_kills_on_timeout() {
        let (_temp, root) = temp_root();
        let runner = ShellRunner::new(Duration::from_millis(200));

        let started = Instant::now();
        let out = runner.run(&root, "sleep", &args(&["5"])).expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn shell_runner_timeout_is_not_held_by_forked_children() {
        let (_temp, root) = temp_root();
        let runner = ShellRunner::new(Duration::from_millis(300));

        let started = Instant::now();
        let out = runner
            .run(&root, "sh", &args(&["-c", "sleep 5; echo done"]))
            .expect("run");
        assert!(out.timed_out);
        assert!(!out.stdout.contains("done"));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn shell_runner_returns_when_background_child_keeps_pipes() {
        let (_temp, root) = temp_root();
        let runner = ShellRunner::new(Duration::from_secs(1));

        let started = Instant::now();
        let out = runner
            .run(&root, "sh", &args(&["-c", "sleep 5 & echo started"]))
            .expect("run");
        assert!(!out.timed_out);
        assert_eq!(out.code, Some(0));
        assert_eq!(out.stdout.trim(), "started");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn shell_runner_uses_c_locale_without_prompts() {
        let (_temp, root) = temp_root();
        let runner = ShellRunner::new(Duration::from_secs(10));

        let out = runner
            .run(
                &root,
                "sh",
                &args(&[
                    "-c",
                    "printf '%s|%s|%s' \"$LC_ALL\" \"$LANGUAGE\" \"$GIT_TERMINAL_PROMPT\"",
                ]),
            )
            .expect("run");
        assert_eq!(out.stdout, "C||0");
    }

    #[test]
    fn shell_runner_reports_missing_program() {
        let (_temp, root) = temp_root();
        let runner = ShellRunner::default();
        assert!(
            runner
                .run(&root, "patchship-definitely-not-a-program", &[])
                .is_err()
        );
    }

    #[test]
    fn http_probe_reports_healthy() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                );
            }
        });

        let probe = HttpHealthProbe::direct();
        let result = probe.probe(&format!("http://{}/health", addr), Duration::from_secs(5));
        assert_eq!(
            result,
            ProbeResult::Healthy {
                status: 200,
                body: "ok".to_string()
            }
        );
        server.join().unwrap();
    }

    #[test]
    fn http_probe_times_out_on_silent_server() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                thread::sleep(Duration::from_secs(2));
                drop(stream);
            }
        });

        let probe = HttpHealthProbe::direct();
        let result = probe.probe(&format!("http://{}/", addr), Duration::from_millis(300));
        assert_eq!(result, ProbeResult::TimedOut);
        server.join().unwrap();
    }

    #[test]
    fn http_probe_reports_unreachable() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr")
        };
        let probe = HttpHealthProbe::direct();
        let result = probe.probe(&format!("http://{}/", addr), Duration::from_secs(2));
        assert!(matches!(result, ProbeResult::Unreachable { .. }));
    }
}
