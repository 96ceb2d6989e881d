//! Subprocess adapters for the external collaborators.
//!
//! The embedding extractor and the speech synthesizer are separate
//! programs with fixed contracts: the extractor reads image bytes on stdin
//! and prints a JSON array of vectors (`[[f32, ...], ...]`, empty array =
//! no face); the synthesizer gets the text and locale as arguments and
//! writes audio bytes to stdout. Both run under a bounded timeout and are
//! killed when it expires.

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tally_core::{Embedding, ExtractorError, FaceExtractor, SpeechSynthesizer, SynthesisError};

enum RunError {
    EmptyCommand,
    Timeout,
    Io(std::io::Error),
    Failed { code: Option<i32>, stderr: String },
}

/// Run a command with bytes on stdin and a wall-clock deadline.
///
/// stdout/stderr are drained on their own threads so a chatty child can
/// never deadlock against a full pipe; the child is polled until the
/// deadline and killed if it is still running.
fn run_with_timeout(
    argv: &[String],
    extra_args: &[&str],
    input: Vec<u8>,
    timeout: Duration,
) -> Result<Vec<u8>, RunError> {
    let (program, args) = argv.split_first().ok_or(RunError::EmptyCommand)?;

    let mut child = Command::new(program)
        .args(args)
        .args(extra_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(RunError::Io)?;

    if let Some(mut stdin) = child.stdin.take() {
        std::thread::spawn(move || {
            // The child may exit without reading everything; that's its call.
            let _ = stdin.write_all(&input);
        });
    }

    let stdout = child.stdout.take();
    let out_thread = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stdout {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    });
    let stderr = child.stderr.take();
    let err_thread = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stderr {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait().map_err(RunError::Io)? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RunError::Timeout);
            }
            None => std::thread::sleep(Duration::from_millis(20)),
        }
    };

    let out = out_thread.join().unwrap_or_default();
    let err = err_thread.join().unwrap_or_default();

    if !status.success() {
        return Err(RunError::Failed {
            code: status.code(),
            stderr: String::from_utf8_lossy(&err).trim().to_string(),
        });
    }
    Ok(out)
}

/// Face extractor backed by a configured command.
pub struct CommandExtractor {
    argv: Vec<String>,
    timeout_secs: u64,
}

impl CommandExtractor {
    pub fn new(argv: Vec<String>, timeout_secs: u64) -> Self {
        Self { argv, timeout_secs }
    }
}

impl FaceExtractor for CommandExtractor {
    fn extract(&self, image: &[u8]) -> Result<Vec<Embedding>, ExtractorError> {
        let out = run_with_timeout(
            &self.argv,
            &[],
            image.to_vec(),
            Duration::from_secs(self.timeout_secs),
        )
        .map_err(|e| match e {
            RunError::EmptyCommand => {
                ExtractorError::Backend("extractor command is not configured".into())
            }
            RunError::Timeout => ExtractorError::Timeout(self.timeout_secs),
            RunError::Io(err) => ExtractorError::Io(err),
            RunError::Failed { code, stderr } => ExtractorError::Backend(format!(
                "extractor exited with status {code:?}: {stderr}"
            )),
        })?;

        let vectors: Vec<Vec<f32>> =
            serde_json::from_slice(&out).map_err(|e| ExtractorError::Malformed(e.to_string()))?;
        Ok(vectors.into_iter().map(Embedding::new).collect())
    }
}

/// Speech synthesizer backed by a configured command.
pub struct CommandSynthesizer {
    argv: Vec<String>,
    timeout_secs: u64,
}

impl CommandSynthesizer {
    pub fn new(argv: Vec<String>, timeout_secs: u64) -> Self {
        Self { argv, timeout_secs }
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn synthesize(&self, text: &str, locale: &str) -> Result<Vec<u8>, SynthesisError> {
        let out = run_with_timeout(
            &self.argv,
            &[text, locale],
            Vec::new(),
            Duration::from_secs(self.timeout_secs),
        )
        .map_err(|e| match e {
            RunError::EmptyCommand => {
                SynthesisError::Backend("synthesizer command is not configured".into())
            }
            RunError::Timeout => SynthesisError::Timeout(self.timeout_secs),
            RunError::Io(err) => SynthesisError::Io(err),
            RunError::Failed { code, stderr } => SynthesisError::Backend(format!(
                "synthesizer exited with status {code:?}: {stderr}"
            )),
        })?;

        if out.is_empty() {
            return Err(SynthesisError::Empty);
        }
        Ok(out)
    }
}
