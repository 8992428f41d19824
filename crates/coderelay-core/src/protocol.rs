//! Wire protocol for client-server communication.
//!
//! Every WebSocket frame carries exactly one JSON object. Inbound frames are
//! tagged by `request`, outbound frames by `response`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Channel used by the session and its background tasks to reach the client.
pub type OutboundTx = mpsc::UnboundedSender<OutboundMessage>;

/// Kinds of request a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Bind the session to a directory and start reporting its files.
    SetWorkingDirectory,
    /// Execute a file from the working directory.
    Run,
    /// Cancel the active run, if any.
    Terminate,
    /// Read a file.
    GetFileContents,
    /// Create an empty file.
    CreateFile,
    /// Overwrite a file.
    SaveFile,
    /// Remove a file.
    DeleteFile,
}

impl RequestKind {
    /// Parse a request tag, accepting the legacy browser-client aliases.
    ///
    /// Returns `None` for tags the protocol does not know.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        let kind = match tag {
            "set-working-directory" | "workingdir" => Self::SetWorkingDirectory,
            "run" => Self::Run,
            "terminate" => Self::Terminate,
            "get-file-contents" | "filecontents" => Self::GetFileContents,
            "create-file" => Self::CreateFile,
            "save-file" | "save" => Self::SaveFile,
            "delete-file" => Self::DeleteFile,
            _ => return None,
        };
        Some(kind)
    }

    /// Canonical wire tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SetWorkingDirectory => "set-working-directory",
            Self::Run => "run",
            Self::Terminate => "terminate",
            Self::GetFileContents => "get-file-contents",
            Self::CreateFile => "create-file",
            Self::SaveFile => "save-file",
            Self::DeleteFile => "delete-file",
        }
    }
}

/// Message from client to server.
///
/// All fields are optional on the wire so that a frame without a `request`
/// can be answered with an error instead of being dropped by the parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl InboundMessage {
    /// Create a request with no payload.
    #[must_use]
    pub fn new(kind: RequestKind) -> Self {
        Self {
            request: Some(kind.as_str().to_string()),
            ..Self::default()
        }
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Attach a filename.
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// The recognised request kind, if the tag is known.
    #[must_use]
    pub fn kind(&self) -> Option<RequestKind> {
        self.request.as_deref().and_then(RequestKind::parse)
    }

    /// Payload as text, when it is a JSON string.
    #[must_use]
    pub fn data_str(&self) -> Option<&str> {
        self.data.as_ref().and_then(Value::as_str)
    }

    /// The file a request targets: the string payload, else the `filename` field.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.data_str()
            .or(self.filename.as_deref())
            .filter(|name| !name.is_empty())
    }
}

/// Kinds of message the server sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseKind {
    #[serde(alias = "filecontents")]
    FileContents,
    Files,
    Starting,
    Stdout,
    Stderr,
    Finished,
    Error,
}

/// The two output streams of a running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }

    /// Response tag used when relaying this stream.
    #[must_use]
    pub const fn response_kind(self) -> ResponseKind {
        match self {
            Self::Stdout => ResponseKind::Stdout,
            Self::Stderr => ResponseKind::Stderr,
        }
    }
}

impl std::fmt::Display for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub response: ResponseKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl OutboundMessage {
    const fn bare(response: ResponseKind) -> Self {
        Self {
            response,
            data: None,
            filename: None,
            description: None,
        }
    }

    /// Contents of a file.
    #[must_use]
    pub fn file_contents(filename: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            data: Some(Value::String(contents.into())),
            filename: Some(filename.into()),
            ..Self::bare(ResponseKind::FileContents)
        }
    }

    /// Full listing of the working directory.
    #[must_use]
    pub fn files(paths: Vec<String>) -> Self {
        Self {
            data: Some(Value::from(paths)),
            ..Self::bare(ResponseKind::Files)
        }
    }

    /// A run has been launched.
    #[must_use]
    pub const fn starting() -> Self {
        Self::bare(ResponseKind::Starting)
    }

    /// A decoded chunk of process output.
    #[must_use]
    pub fn output(stream: OutputStream, text: impl Into<String>) -> Self {
        Self {
            data: Some(Value::String(text.into())),
            ..Self::bare(stream.response_kind())
        }
    }

    /// A run ended on its own with `code`.
    #[must_use]
    pub fn finished(code: i32) -> Self {
        Self {
            data: Some(Value::from(code)),
            ..Self::bare(ResponseKind::Finished)
        }
    }

    /// A request failed.
    #[must_use]
    pub fn error(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Self::bare(ResponseKind::Error)
        }
    }

    /// Payload as text, when it is a JSON string.
    #[must_use]
    pub fn data_str(&self) -> Option<&str> {
        self.data.as_ref().and_then(Value::as_str)
    }
}
