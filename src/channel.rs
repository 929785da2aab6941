//! Delivery channels and per-channel policy
//!
//! A static table of channel constraints (length limit, markup capability,
//! split strategy) consulted by the formatting stage. The built-in table
//! covers the supported channel set; deployments can override it from YAML.
//! Loaded once, immutable afterwards.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Supported delivery channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Slack,
    Teams,
    Email,
    Web,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Slack => "slack",
            Channel::Teams => "teams",
            Channel::Email => "email",
            Channel::Web => "web",
        }
    }

    pub const ALL: [Channel; 5] = [
        Channel::Sms,
        Channel::Slack,
        Channel::Teams,
        Channel::Email,
        Channel::Web,
    ];
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sms" => Ok(Channel::Sms),
            "slack" => Ok(Channel::Slack),
            "teams" => Ok(Channel::Teams),
            "email" => Ok(Channel::Email),
            "web" => Ok(Channel::Web),
            other => Err(EngineError::InvalidInput(format!(
                "unsupported channel '{other}'"
            ))),
        }
    }
}

/// Structural markup kinds a channel may or may not render
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkupKind {
    Bold,
    Italic,
    Code,
    Link,
}

/// How over-length content is divided into parts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SplitStrategy {
    Sentence,
    Paragraph,
    HardWord,
}

/// Constraints for one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPolicy {
    /// Maximum content length in characters; None means unlimited
    pub max_length: Option<usize>,
    /// Markup kinds this channel renders; everything else is stripped
    #[serde(default)]
    pub markup: BTreeSet<MarkupKind>,
    pub split_strategy: SplitStrategy,
    /// Whether style emoji are appropriate on this channel
    #[serde(default)]
    pub supports_emoji: bool,
}

impl ChannelPolicy {
    pub fn allows(&self, kind: MarkupKind) -> bool {
        self.markup.contains(&kind)
    }
}

/// Immutable per-channel policy table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPolicyTable {
    policies: HashMap<Channel, ChannelPolicy>,
}

static BUILTIN_POLICIES: Lazy<ChannelPolicyTable> = Lazy::new(|| {
    let all_markup: BTreeSet<MarkupKind> = [
        MarkupKind::Bold,
        MarkupKind::Italic,
        MarkupKind::Code,
        MarkupKind::Link,
    ]
    .into_iter()
    .collect();

    let mut policies = HashMap::new();
    policies.insert(
        Channel::Sms,
        ChannelPolicy {
            max_length: Some(1600),
            markup: BTreeSet::new(),
            split_strategy: SplitStrategy::Sentence,
            supports_emoji: false,
        },
    );
    policies.insert(
        Channel::Slack,
        ChannelPolicy {
            max_length: Some(40_000),
            markup: all_markup.clone(),
            split_strategy: SplitStrategy::Paragraph,
            supports_emoji: true,
        },
    );
    policies.insert(
        Channel::Teams,
        ChannelPolicy {
            max_length: Some(28_000),
            markup: all_markup.clone(),
            split_strategy: SplitStrategy::Paragraph,
            supports_emoji: true,
        },
    );
    policies.insert(
        Channel::Email,
        ChannelPolicy {
            max_length: None,
            markup: all_markup,
            split_strategy: SplitStrategy::Paragraph,
            supports_emoji: false,
        },
    );
    policies.insert(
        Channel::Web,
        ChannelPolicy {
            max_length: Some(4000),
            markup: [MarkupKind::Bold, MarkupKind::Italic, MarkupKind::Link]
                .into_iter()
                .collect(),
            split_strategy: SplitStrategy::Sentence,
            supports_emoji: true,
        },
    );
    ChannelPolicyTable { policies }
});

impl ChannelPolicyTable {
    /// The built-in table covering every supported channel.
    pub fn builtin() -> Self {
        BUILTIN_POLICIES.clone()
    }

    /// Load overrides from YAML; channels absent from the file keep their
    /// built-in policy.
    pub fn load_from_str(yaml: &str) -> EngineResult<Self> {
        let overrides: HashMap<Channel, ChannelPolicy> = serde_yaml::from_str(yaml)
            .map_err(|e| EngineError::Config(format!("channel policy parse error: {e}")))?;
        let mut table = Self::builtin();
        table.policies.extend(overrides);
        Ok(table)
    }

    pub fn load_from_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::load_from_str(&content)
    }

    pub fn policy(&self, channel: Channel) -> Option<&ChannelPolicy> {
        self.policies.get(&channel)
    }
}

impl Default for ChannelPolicyTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_parse() {
        assert_eq!(" SMS ".parse::<Channel>().unwrap(), Channel::Sms);
        assert_eq!("slack".parse::<Channel>().unwrap(), Channel::Slack);
        assert!("carrier-pigeon".parse::<Channel>().is_err());
    }

    #[test]
    fn test_builtin_covers_all_channels() {
        let table = ChannelPolicyTable::builtin();
        for channel in Channel::ALL {
            assert!(table.policy(channel).is_some(), "missing {channel}");
        }
    }

    #[test]
    fn test_sms_policy_is_plain_text() {
        let table = ChannelPolicyTable::builtin();
        let sms = table.policy(Channel::Sms).unwrap();
        assert_eq!(sms.max_length, Some(1600));
        assert!(sms.markup.is_empty());
        assert!(!sms.allows(MarkupKind::Bold));
    }

    #[test]
    fn test_yaml_override_keeps_other_channels() {
        let yaml = r#"
sms:
  max_length: 320
  split_strategy: hard-word
"#;
        let table = ChannelPolicyTable::load_from_str(yaml).unwrap();
        assert_eq!(table.policy(Channel::Sms).unwrap().max_length, Some(320));
        assert_eq!(
            table.policy(Channel::Sms).unwrap().split_strategy,
            SplitStrategy::HardWord
        );
        // Untouched channel retains its built-in policy
        assert_eq!(
            table.policy(Channel::Slack).unwrap().max_length,
            Some(40_000)
        );
    }

    #[test]
    fn test_email_is_unlimited() {
        let table = ChannelPolicyTable::builtin();
        assert_eq!(table.policy(Channel::Email).unwrap().max_length, None);
    }
}
