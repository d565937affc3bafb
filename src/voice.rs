//! Voice input and output.
//!
//! Both directions are optional. When the host has no speech command the
//! corresponding adapter is absent and every call on it does nothing.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

static SPEECH_MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[*#`]").unwrap());

/// Drops emphasis, heading and code-span markers so they are not read out.
pub fn strip_speech_markup(text: &str) -> String {
    SPEECH_MARKUP.replace_all(text, "").into_owned()
}

/// Splits a configured command line with shell quoting rules.
fn split_command(command: &str) -> Option<(String, Vec<String>)> {
    let Some(mut words) = shlex::split(command) else {
        tracing::warn!(command, "speech command has unbalanced quotes");
        return None;
    };
    if words.is_empty() {
        return None;
    }
    let program = words.remove(0);
    Some((program, words))
}

/// Splits a configured command line and resolves its program on `PATH`.
fn resolve_command(command: &str) -> Option<(PathBuf, Vec<String>)> {
    let (program, args) = split_command(command)?;
    match which::which(&program) {
        Ok(path) => Some((path, args)),
        Err(e) => {
            tracing::info!(program, "speech command unavailable: {e}");
            None
        }
    }
}

// ── Text-to-speech ─────────────────────────────────────────────────────────

pub trait Speaker: Send {
    /// Starts speaking. Callers cancel first; implementations may assume
    /// nothing is playing.
    fn speak(&mut self, text: &str) -> Result<()>;
    fn cancel(&mut self);
}

/// Speaks by running a command that reads the text from stdin.
pub struct CommandSpeaker {
    program: PathBuf,
    args: Vec<String>,
    current: Option<Child>,
}

impl CommandSpeaker {
    pub fn from_command(command: &str) -> Option<Self> {
        let (program, args) = resolve_command(command)?;
        Some(Self {
            program,
            args,
            current: None,
        })
    }
}

impl Speaker for CommandSpeaker {
    fn speak(&mut self, text: &str) -> Result<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", self.program.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            let text = text.to_string();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(text.as_bytes()).await {
                    tracing::debug!("speech input not delivered: {e}");
                }
                // Dropping stdin closes it so the speaker sees end of input
            });
        }
        self.current = Some(child);
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(mut child) = self.current.take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!("speech process already gone: {e}");
            }
        }
    }
}

/// Outbound voice. At most one utterance plays; the latest request wins.
pub struct Tts {
    speaker: Option<Box<dyn Speaker>>,
}

impl Tts {
    pub fn new(speaker: Option<Box<dyn Speaker>>) -> Self {
        Self { speaker }
    }

    pub fn from_command(command: Option<&str>) -> Self {
        let speaker = command
            .and_then(CommandSpeaker::from_command)
            .map(|s| Box::new(s) as Box<dyn Speaker>);
        Self::new(speaker)
    }

    pub fn is_available(&self) -> bool {
        self.speaker.is_some()
    }

    pub fn speak(&mut self, text: &str) -> Result<()> {
        let Some(speaker) = self.speaker.as_mut() else {
            return Ok(());
        };
        speaker.cancel();
        let clean = strip_speech_markup(text);
        tracing::debug!(chars = clean.len(), "speaking");
        speaker.speak(&clean)
    }

    pub fn cancel(&mut self) {
        if let Some(speaker) = self.speaker.as_mut() {
            speaker.cancel();
        }
    }
}

// ── Speech-to-text ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// A final transcript for the utterance.
    Result(String),
    /// Recognition stopped, with or without a result.
    End,
}

pub type RecognitionSink = Arc<dyn Fn(RecognitionEvent) + Send + Sync>;

/// Single-shot recognizer. Delivers its events through the sink it was
/// built with.
pub trait Recognizer: Send {
    fn start(&mut self) -> Result<()>;
}

/// Runs a command that records one utterance and prints its transcript.
pub struct CommandRecognizer {
    program: PathBuf,
    args: Vec<String>,
    sink: RecognitionSink,
}

impl CommandRecognizer {
    pub fn from_command(command: &str, sink: RecognitionSink) -> Option<Self> {
        let (program, args) = resolve_command(command)?;
        Some(Self {
            program,
            args,
            sink,
        })
    }
}

impl Recognizer for CommandRecognizer {
    fn start(&mut self) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let sink = self.sink.clone();
        let program = self.program.display().to_string();

        tokio::spawn(async move {
            match command.output().await {
                Ok(output) if output.status.success() => {
                    let transcript = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !transcript.is_empty() {
                        sink(RecognitionEvent::Result(transcript));
                    }
                }
                Ok(output) => {
                    tracing::warn!(program, status = %output.status, "recognizer failed");
                }
                Err(e) => tracing::warn!(program, "recognizer did not run: {e}"),
            }
            sink(RecognitionEvent::End);
        });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenState {
    Idle,
    Listening,
}

/// Inbound voice as a two-state machine.
pub struct VoiceInput {
    state: ListenState,
    recognizer: Option<Box<dyn Recognizer>>,
}

impl VoiceInput {
    pub fn new(recognizer: Option<Box<dyn Recognizer>>) -> Self {
        Self {
            state: ListenState::Idle,
            recognizer,
        }
    }

    pub fn from_command(command: Option<&str>, sink: RecognitionSink) -> Self {
        let recognizer = command
            .and_then(|c| CommandRecognizer::from_command(c, sink))
            .map(|r| Box::new(r) as Box<dyn Recognizer>);
        Self::new(recognizer)
    }

    pub fn is_available(&self) -> bool {
        self.recognizer.is_some()
    }

    pub fn state(&self) -> ListenState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state() == ListenState::Listening
    }

    /// Idle → Listening. Ignored while already listening or when no
    /// recognizer exists.
    pub fn start(&mut self) -> Result<()> {
        if self.state == ListenState::Listening {
            return Ok(());
        }
        let Some(recognizer) = self.recognizer.as_mut() else {
            return Ok(());
        };
        recognizer.start()?;
        self.transition(ListenState::Listening);
        Ok(())
    }

    /// Feeds a recognizer event. Returns the transcript that should replace
    /// the input field, if any.
    pub fn handle(&mut self, event: RecognitionEvent) -> Option<String> {
        match event {
            RecognitionEvent::Result(transcript) => {
                self.transition(ListenState::Idle);
                Some(transcript)
            }
            RecognitionEvent::End => {
                self.transition(ListenState::Idle);
                None
            }
        }
    }

    fn transition(&mut self, next: ListenState) {
        if self.state == next {
            return;
        }
        match next {
            ListenState::Listening => tracing::debug!("listening"),
            ListenState::Idle => tracing::debug!("stopped listening"),
        }
        self.state = next;
    }
}
