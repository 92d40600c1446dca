//! RPC command authorization.
//!
//! A plaintext command is 2 or 3 space-separated tokens whose joined length
//! is exactly the configured plain size. Short commands are padded with a
//! filler token. Role rules:
//!
//! - `ready` only travels master -> client
//! - `data` only travels master -> master
//! - `zip <count>` carries a non-negative integer file count
//! - anything else must be `node`, `zip`, or a registered list request

use std::collections::HashSet;
use std::fmt;

use fleet_common::constants::verbs;
use fleet_common::{ClusterError, NodeType};

use crate::config::ClusterConfig;

/// A command that passed authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(String);

impl Command {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn verb(&self) -> &str {
        self.0.split(' ').next().unwrap_or_default()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Authorization rules for one cluster
#[derive(Debug, Clone)]
pub struct CommandRules {
    plain_size: usize,
    registry: HashSet<String>,
}

impl CommandRules {
    pub fn new(plain_size: usize, registry: impl IntoIterator<Item = String>) -> Self {
        Self {
            plain_size,
            registry: registry.into_iter().collect(),
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(config.plain_size, config.list_requests.iter().cloned())
    }

    /// Check a tokenized command sent by `sender` to a node of role `target`.
    /// An unknown `target` never satisfies the role-restricted verbs.
    pub fn is_valid_command(
        &self,
        tokens: &[&str],
        sender: NodeType,
        target: Option<NodeType>,
    ) -> bool {
        if tokens.len() != 2 && tokens.len() != 3 {
            return false;
        }

        if tokens.join(" ").len() != self.plain_size {
            return false;
        }

        match tokens[0] {
            verbs::READY => sender == NodeType::Master && target == Some(NodeType::Client),
            verbs::DATA => sender == NodeType::Master && target == Some(NodeType::Master),
            verbs::ZIP => is_count(tokens[1]),
            verbs::NODE => true,
            verb => self.registry.contains(verb),
        }
    }

    /// Whether a node of role `receiver` should act on `tokens`.
    /// The sender's role is not on the wire, so any role that makes the
    /// command valid is accepted.
    pub fn accepts(&self, tokens: &[&str], receiver: NodeType) -> bool {
        [NodeType::Master, NodeType::Client]
            .into_iter()
            .any(|sender| self.is_valid_command(tokens, sender, Some(receiver)))
    }

    /// Authorize an already-formed command string
    pub fn authorize(
        &self,
        raw: &str,
        sender: NodeType,
        target: Option<NodeType>,
    ) -> Result<Command, ClusterError> {
        let tokens: Vec<&str> = raw.split(' ').collect();
        if self.is_valid_command(&tokens, sender, target) {
            Ok(Command(raw.to_string()))
        } else {
            Err(ClusterError::ProtocolViolation(format!(
                "command '{}' rejected for {} -> {}",
                tokens.first().copied().unwrap_or_default(),
                sender,
                target.map(|t| t.as_str()).unwrap_or("unknown"),
            )))
        }
    }

    /// Build `verb [arg] <filler>` padded to the plain size, then authorize it
    pub fn command(
        &self,
        verb: &str,
        arg: Option<&str>,
        sender: NodeType,
        target: Option<NodeType>,
    ) -> Result<Command, ClusterError> {
        let head = match arg {
            Some(arg) => format!("{verb} {arg}"),
            None => verb.to_string(),
        };

        // one separator plus at least one filler byte
        let filler = self
            .plain_size
            .checked_sub(head.len() + 1)
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                ClusterError::ProtocolViolation(format!(
                    "'{verb}' does not fit in {} bytes",
                    self.plain_size
                ))
            })?;

        self.authorize(&format!("{head} {}", "a".repeat(filler)), sender, target)
    }

    /// The padded `node` status request
    pub fn node_request(&self, sender: NodeType) -> Result<Command, ClusterError> {
        self.command(verbs::NODE, None, sender, None)
    }
}

fn is_count(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}
