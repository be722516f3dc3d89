use std::path::{Component, Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while constructing an [`ExecPolicy`].
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid forbidden pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to resolve allowed root '{root}': {source}")]
    InvalidRoot {
        root: String,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of a single command or path validation check.
///
/// The reason string is deterministic for a given policy and input; callers
/// surface it verbatim in rejection reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }

    /// Rejection reason, or an empty string when the check passed.
    pub fn reason_text(&self) -> &str {
        self.reason.as_deref().unwrap_or_default()
    }
}

/// Immutable allow/deny configuration governing command execution.
///
/// Constructed once (regexes compiled, roots normalized), then shared
/// read-only behind an `Arc`. Validation is layered: the executable
/// allowlist is a safelist checked first; the forbidden-command and
/// forbidden-pattern lists are blocklists checked afterwards, in order,
/// with the first failing check winning.
#[derive(Debug, Clone)]
pub struct ExecPolicy {
    allowed_commands: Vec<String>,
    forbidden_commands: Vec<String>,
    forbidden_patterns: Vec<Regex>,
    allowed_roots: Vec<PathBuf>,
}

impl ExecPolicy {
    pub fn new(
        allowed_commands: Vec<String>,
        forbidden_commands: Vec<String>,
        forbidden_patterns: Vec<String>,
        allowed_roots: Vec<PathBuf>,
    ) -> Result<Self, PolicyError> {
        let mut compiled = Vec::with_capacity(forbidden_patterns.len());
        for pattern in forbidden_patterns {
            match Regex::new(&pattern) {
                Ok(regex) => compiled.push(regex),
                Err(source) => return Err(PolicyError::InvalidPattern { pattern, source }),
            }
        }

        let mut normalized_roots = Vec::with_capacity(allowed_roots.len());
        for root in allowed_roots {
            match normalize_path(&root) {
                Ok(normalized) => normalized_roots.push(normalized),
                Err(source) => {
                    return Err(PolicyError::InvalidRoot {
                        root: root.display().to_string(),
                        source,
                    })
                }
            }
        }

        Ok(Self {
            allowed_commands,
            forbidden_commands,
            forbidden_patterns: compiled,
            allowed_roots: normalized_roots,
        })
    }

    pub fn allowed_commands(&self) -> &[String] {
        &self.allowed_commands
    }

    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    /// Decides whether a raw command line may be executed.
    ///
    /// Checks run in a fixed order and short-circuit on the first failure:
    /// empty input, shell tokenization, executable allowlist (deny by
    /// default), forbidden substrings, forbidden patterns. Both blocklists
    /// are matched against the raw command string, never a re-quoted form.
    pub fn validate_command(&self, command: &str) -> Validation {
        if command.is_empty() {
            return Validation::rejected("Empty command");
        }

        let parts = match shell_words::split(command) {
            Ok(parts) => parts,
            Err(error) => {
                return Validation::rejected(format!("Invalid command format: {error}"));
            }
        };

        let Some(executable) = parts.first() else {
            return Validation::rejected("Empty command after parsing");
        };

        if !self
            .allowed_commands
            .iter()
            .any(|allowed| allowed == executable)
        {
            return Validation::rejected(format!("Command not allowed: {executable}"));
        }

        for forbidden in &self.forbidden_commands {
            if command.contains(forbidden.as_str()) {
                return Validation::rejected(format!(
                    "Command contains forbidden element: {forbidden}"
                ));
            }
        }

        for pattern in &self.forbidden_patterns {
            if pattern.is_match(command) {
                return Validation::rejected(format!(
                    "Command matches forbidden pattern: {pattern}"
                ));
            }
        }

        Validation::ok()
    }

    /// Decides whether a path lies under one of the allowed roots.
    ///
    /// The path is normalized lexically (absolute, `.`/`..` resolved,
    /// symlinks untouched) and compared against each root by string prefix.
    /// A sibling directory sharing a root's prefix therefore passes; that
    /// weakness is part of the contract and pinned by tests.
    pub fn validate_path(&self, path: &str) -> Validation {
        if path.is_empty() {
            return Validation::rejected("Empty path");
        }

        let normalized = match normalize_path(Path::new(path)) {
            Ok(normalized) => normalized,
            Err(error) => {
                return Validation::rejected(format!("Failed to normalize path '{path}': {error}"));
            }
        };

        let candidate = normalized.to_string_lossy().into_owned();
        for root in &self.allowed_roots {
            if candidate.starts_with(root.to_string_lossy().as_ref()) {
                return Validation::ok();
            }
        }

        Validation::rejected(format!("Path not in allowed directories: {path}"))
    }
}

/// Lexically normalizes a path: made absolute against the current directory,
/// with `.` and `..` components resolved textually. Symlinks are not
/// followed; the result is meant for string-prefix root checks, not
/// filesystem containment.
pub fn normalize_path(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping at the root is a no-op, matching lexical normpath.
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    Ok(normalized)
}
