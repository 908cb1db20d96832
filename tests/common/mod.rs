//! Shared test infrastructure for integration tests.

use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// A valid refinement object, as a well-behaved provider CLI would print it.
pub const VALID_RESPONSE: &str = r#"{"improvedPrompt":"Write a CSV importer that validates rows before inserting them into Postgres.","rationale":"Made the validation step explicit.","risks":["Malformed rows"],"tags":["etl"],"metadata":{"sections":["Requirements","Tests"],"acceptanceCriteria":["Invalid rows are reported"],"checklist":["Schema reviewed"]}}"#;

/// Isolated environment for running the `refiner` binary.
///
/// Every run gets its own HOME and config dir, so a rules file on the host
/// machine cannot leak into a test.
pub struct Fixture {
    temp: TempDir,
    lm_command: Option<String>,
    alt_lm_command: Option<String>,
    rules_env: Option<PathBuf>,
}

/// Exit status and captured streams of one binary run.
#[derive(Debug)]
pub struct RunResult {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RunResult {
    fn from_output(output: Output) -> Self {
        RunResult {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }

    /// Parse stdout as a single JSON document.
    pub fn json(&self) -> Value {
        serde_json::from_str(self.stdout.trim()).unwrap_or_else(|err| {
            panic!(
                "stdout is not JSON ({err}):\n{}\nstderr:\n{}",
                self.stdout, self.stderr
            )
        })
    }
}

/// String values of a JSON array, for compact assertions.
pub fn strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    pub fn new() -> Self {
        Fixture {
            temp: TempDir::new().expect("create temp dir"),
            lm_command: None,
            alt_lm_command: None,
            rules_env: None,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Write a shell script under the fixture root and return its path.
    pub fn write_script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.root().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        path
    }

    pub fn write_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.root().join(name);
        fs::write(&path, contents).expect("write file");
        path
    }

    /// Default provider that discards stdin and prints `response`.
    pub fn with_mock_lm(mut self, response: &str) -> Self {
        let response_path = self.write_file("response.txt", response);
        let script = self.write_script(
            "mock-lm.sh",
            &format!("cat > /dev/null\ncat '{}'", response_path.display()),
        );
        self.lm_command = Some(format!("sh '{}' {{model}}", script.display()));
        self
    }

    /// Default provider that records its stdin and arguments, then prints a
    /// valid response.
    pub fn with_recording_lm(mut self) -> Self {
        let response_path = self.write_file("response.txt", VALID_RESPONSE);
        let stdin_path = self.root().join("lm-stdin.txt");
        let args_path = self.root().join("lm-args.txt");
        let script = self.write_script(
            "recording-lm.sh",
            &format!(
                "cat > '{}'\nprintf '%s\\n' \"$@\" > '{}'\ncat '{}'",
                stdin_path.display(),
                args_path.display(),
                response_path.display()
            ),
        );
        self.lm_command = Some(format!("sh '{}' --model {{model}}", script.display()));
        self
    }

    /// Default provider whose program does not exist.
    pub fn with_missing_lm(mut self) -> Self {
        self.lm_command = Some("refiner-test-missing-backend".to_string());
        self
    }

    pub fn with_alt_lm_command(mut self, command: &str) -> Self {
        self.alt_lm_command = Some(command.to_string());
        self
    }

    pub fn with_rules_env(mut self, path: PathBuf) -> Self {
        self.rules_env = Some(path);
        self
    }

    /// Contents of a file the recording provider wrote, if it ran.
    pub fn recorded(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.root().join(name)).ok()
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_refiner"));
        cmd.args(args)
            .env("HOME", self.root())
            .env("XDG_CONFIG_HOME", self.root().join("config"))
            .env_remove("REFINER_RULES")
            .env_remove("REFINER_LOG")
            .env_remove("REFINER_LM_COMMAND")
            .env_remove("REFINER_ALT_LM_COMMAND");
        if let Some(lm) = &self.lm_command {
            cmd.env("REFINER_LM_COMMAND", lm);
        }
        if let Some(lm) = &self.alt_lm_command {
            cmd.env("REFINER_ALT_LM_COMMAND", lm);
        }
        if let Some(path) = &self.rules_env {
            cmd.env("REFINER_RULES", path);
        }
        cmd
    }

    /// Run the binary with stdin closed.
    pub fn run(&self, args: &[&str]) -> RunResult {
        let output = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .expect("run refiner");
        RunResult::from_output(output)
    }

    /// Run the binary with `input` on stdin.
    pub fn run_with_stdin(&self, args: &[&str], input: &str) -> RunResult {
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("spawn refiner");
        child
            .stdin
            .take()
            .expect("stdin piped")
            .write_all(input.as_bytes())
            .expect("write stdin");
        RunResult::from_output(child.wait_with_output().expect("wait for refiner"))
    }
}
