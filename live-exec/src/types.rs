use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Supported programming languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Php,
    Ruby,
    Bash,
    C,
    Cpp,
    Go,
    Rust,
    Java,
}

impl Language {
    pub const ALL: [Language; 11] = [
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::Php,
        Language::Ruby,
        Language::Bash,
        Language::C,
        Language::Cpp,
        Language::Go,
        Language::Rust,
        Language::Java,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Php => "php",
            Language::Ruby => "ruby",
            Language::Bash => "bash",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Java => "java",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "typescript" | "ts" => Ok(Language::TypeScript),
            "php" => Ok(Language::Php),
            "ruby" | "rb" => Ok(Language::Ruby),
            "bash" | "sh" => Ok(Language::Bash),
            "c" => Ok(Language::C),
            "cpp" | "c++" => Ok(Language::Cpp),
            "go" | "golang" => Ok(Language::Go),
            "rust" | "rs" => Ok(Language::Rust),
            "java" => Ok(Language::Java),
            _ => Err(Error::Protocol(format!("Unsupported language: {}", s))),
        }
    }
}

/// One submitted source file. `name` is relative to the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub content: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Payload of an inbound `run` message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Language tag, parsed lazily so an unknown tag is reported as a run error
    pub language: String,
    pub files: Vec<SourceFile>,
    /// Designated entry file; defaults to the first submitted file
    #[serde(default)]
    pub entry: Option<String>,
}

impl RunRequest {
    pub fn new(language: Language, files: Vec<SourceFile>) -> Self {
        Self {
            language: language.as_str().to_string(),
            files,
            entry: None,
        }
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    pub fn entry_name(&self) -> Option<&str> {
        self.entry
            .as_deref()
            .or_else(|| self.files.first().map(|f| f.name.as_str()))
    }

    pub fn payload_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.content.len() as u64).sum()
    }
}

/// Messages a connected client may send
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Run(RunRequest),
    Input { data: String },
    Terminate,
}

/// Messages sent back to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEvent {
    Stdout { data: String },
    Stderr { data: String },
    Exit { code: ExitCode },
    Error { message: String },
}

impl ServerEvent {
    pub fn terminated() -> Self {
        ServerEvent::Exit {
            code: ExitCode::Marker(TERMINATED_MARKER.to_string()),
        }
    }

    pub fn error(err: &Error) -> Self {
        ServerEvent::Error {
            message: err.to_string(),
        }
    }
}

pub const TERMINATED_MARKER: &str = "terminated";

/// Value of the `code` field of an `exit` event: a numeric exit code, the
/// explicit-termination marker, or the name of the signal that killed the
/// program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExitCode {
    Code(i32),
    Marker(String),
}

/// How a supervised process ended on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Code(i32),
    Signal(i32),
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Code(code) => ExitCode::Code(code),
            ExitStatus::Signal(signal) => ExitCode::Marker(
                nix::sys::signal::Signal::try_from(signal)
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|_| format!("signal {}", signal)),
            ),
        }
    }
}
