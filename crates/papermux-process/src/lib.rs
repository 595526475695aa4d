use std::fmt;

/// Name of the multiplexer session hosting the server console.
///
/// NOTE: tmux silently rewrites `.` and `:` in session names, and the name is
/// also substituted into the fallback creation command, so only a conservative
/// character set is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionName(String);

impl SessionName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionName {
    type Error = InvalidName;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidName::Empty("session name"));
        }
        if let Some(c) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_')))
        {
            return Err(InvalidName::BadChar("session name", c));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<&str> for SessionName {
    type Error = InvalidName;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Self::try_from(raw.to_string())
    }
}

impl From<SessionName> for String {
    fn from(v: SessionName) -> Self {
        v.0
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Release line artifacts are resolved against, e.g. `1.18`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionChannel(String);

impl VersionChannel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VersionChannel {
    type Error = InvalidName;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidName::Empty("version channel"));
        }
        // Used both as a URL path segment and inside a filename pattern.
        if let Some(c) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
        {
            return Err(InvalidName::BadChar("version channel", c));
        }
        if trimmed.contains("..") {
            return Err(InvalidName::BadChar("version channel", '.'));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<&str> for VersionChannel {
    type Error = InvalidName;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Self::try_from(raw.to_string())
    }
}

impl From<VersionChannel> for String {
    fn from(v: VersionChannel) -> Self {
        v.0
    }
}

impl fmt::Display for VersionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidName {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{0} contains unsupported character {1:?}")]
    BadChar(&'static str, char),
}

/// Logical server state. Nothing persists it: it is derived from whether the
/// session exists plus which operation is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ServerState {
    /// State observed from outside any operation.
    pub fn observed(session_exists: bool) -> Self {
        if session_exists {
            ServerState::Running
        } else {
            ServerState::Stopped
        }
    }

    pub fn can_start(self) -> bool {
        matches!(self, ServerState::Stopped)
    }

    pub fn can_stop(self) -> bool {
        matches!(self, ServerState::Running)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}
