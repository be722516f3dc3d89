use std::path::{Path, PathBuf};

use crate::policy::{ExecPolicy, PolicyError};

/// Executable allowlist for the containerized profile, where the filesystem
/// root is permitted and the container is the blast radius.
const CONTAINERIZED_ALLOWED_COMMANDS: &[&str] = &[
    "ls", "cat", "echo", "pwd", "touch", "mkdir", "rmdir", "cp", "mv", "grep", "find", "head",
    "tail", "wc", "sort", "uniq", "date", "sleep", "printf",
];

/// Executable allowlist for the host profile, where only one project
/// directory is permitted. Shell interpreters stay unlisted in both
/// profiles; the executor's own wrapping happens after validation.
const HOST_ALLOWED_COMMANDS: &[&str] = &[
    "ls", "cat", "echo", "pwd", "touch", "mkdir", "rmdir", "cp", "mv", "sleep",
];

/// Substrings rejected anywhere in a command line, in both profiles.
pub const DEFAULT_FORBIDDEN_COMMANDS: &[&str] = &[
    "sudo",
    "rm -rf",
    "chmod",
    "chown",
    "kill",
    "reboot",
    "shutdown",
    "mount",
    "umount",
    "dd",
    "iptables",
    "systemctl",
    "service",
];

/// Regexes rejected against the raw command line, in both profiles: piping
/// into a shell interpreter, command substitution, backgrounded sleep/wait
/// chains, redirection into system directories, raw IPv4 literals, and
/// network-protocol URIs.
pub const DEFAULT_FORBIDDEN_PATTERNS: &[&str] = &[
    r"\|\s*(sh|bash|zsh|dash|ksh)\b",
    r"`",
    r"\$\(",
    r"&\s*(sleep|wait)\b",
    r">\s*/(etc|usr|bin|sbin|var|root|home|boot|dev|proc|sys|lib|opt)\b",
    r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b",
    r"(https?|ftp|sftp|ssh|scp|telnet)://",
];

/// Named policy variants. Which one is active is an environment decision
/// made by the caller, never by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyProfile {
    Containerized,
    Host,
}

pub fn profile_name(profile: PolicyProfile) -> &'static str {
    match profile {
        PolicyProfile::Containerized => "containerized",
        PolicyProfile::Host => "host",
    }
}

fn to_strings(entries: &[&str]) -> Vec<String> {
    entries.iter().map(|entry| (*entry).to_string()).collect()
}

impl ExecPolicy {
    /// Policy for a sandboxed container: wider allowlist, root `/` permitted.
    pub fn containerized() -> Result<Self, PolicyError> {
        Self::new(
            to_strings(CONTAINERIZED_ALLOWED_COMMANDS),
            to_strings(DEFAULT_FORBIDDEN_COMMANDS),
            to_strings(DEFAULT_FORBIDDEN_PATTERNS),
            vec![PathBuf::from("/")],
        )
    }

    /// Policy for running directly on a host: conservative allowlist, a
    /// single permitted project directory.
    pub fn host(project_root: &Path) -> Result<Self, PolicyError> {
        Self::new(
            to_strings(HOST_ALLOWED_COMMANDS),
            to_strings(DEFAULT_FORBIDDEN_COMMANDS),
            to_strings(DEFAULT_FORBIDDEN_PATTERNS),
            vec![project_root.to_path_buf()],
        )
    }

    pub fn for_profile(profile: PolicyProfile, project_root: &Path) -> Result<Self, PolicyError> {
        match profile {
            PolicyProfile::Containerized => Self::containerized(),
            PolicyProfile::Host => Self::host(project_root),
        }
    }
}
