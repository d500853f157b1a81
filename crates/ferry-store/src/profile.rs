//! Declarative description of how the keys of one representation line up with another.
//!
//! A profile names the frameworks (and optionally the architectures) it applies to and
//! lists, as data, every filter, rewrite and exception the conversion needs. Profiles are
//! validated when they are registered, so a malformed table fails before any tensor moves.

use core::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{ConvertError, DType, Framework};

/// Precedence class of a filter rule. Rules run in stage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStage {
    /// Tensors that do not exist under the destination's bias convention.
    BiasConvention,
    /// Keys of a block the other side never materializes.
    StructuralPrefix,
    /// Batch-norm running statistics.
    RunningStatistics,
    /// Learned discrete indices.
    StructuralIndex,
    /// Framework bookkeeping without counterpart.
    Bookkeeping,
}

/// Semantic role of an auxiliary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuxRole {
    /// Running mean of a batch-norm layer.
    RunningMean,
    /// Running variance of a batch-norm layer.
    RunningVar,
    /// Learned pruning or group-selection index.
    StructuralIndex,
}

impl fmt::Display for AuxRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuxRole::RunningMean => "running_mean",
            AuxRole::RunningVar => "running_var",
            AuxRole::StructuralIndex => "structural_index",
        })
    }
}

/// What happens to a key matched by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterAction {
    /// The key has no counterpart and is left out.
    Drop,
    /// The key leaves the positional walk and is resolved by role.
    Auxiliary {
        /// Role of the routed keys
        role: AuxRole,
    },
}

/// Predicate selecting keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyMatcher {
    /// Keys ending with `suffix`.
    Suffix {
        /// Suffix
        suffix: String,
    },
    /// Keys starting with `prefix`.
    Prefix {
        /// Prefix
        prefix: String,
    },
    /// Keys starting with `prefix` and ending with `suffix`.
    PrefixSuffix {
        /// Prefix
        prefix: String,
        /// Suffix
        suffix: String,
    },
    /// The first `count` keys still retained when the rule runs.
    Leading {
        /// Number of keys
        count: usize,
    },
    /// Keys that do not start with `prefix`.
    KeepPrefix {
        /// Prefix to keep
        prefix: String,
    },
    /// Keys matching a regular expression.
    Regex {
        /// Pattern
        pattern: String,
    },
}

impl KeyMatcher {
    /// Keys ending with `suffix`.
    pub fn suffix(suffix: impl Into<String>) -> Self {
        Self::Suffix {
            suffix: suffix.into(),
        }
    }

    /// Keys starting with `prefix`.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix {
            prefix: prefix.into(),
        }
    }

    /// Keys starting with `prefix` and ending with `suffix`.
    pub fn prefix_suffix(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self::PrefixSuffix {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// Keys that do not start with `prefix`.
    pub fn keep_prefix(prefix: impl Into<String>) -> Self {
        Self::KeepPrefix {
            prefix: prefix.into(),
        }
    }

    /// Whether the matcher selects by position rather than by spelling.
    pub fn is_positional(&self) -> bool {
        matches!(self, KeyMatcher::Leading { .. })
    }
}

impl fmt::Display for KeyMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMatcher::Suffix { suffix } => write!(f, "*{suffix}"),
            KeyMatcher::Prefix { prefix } => write!(f, "{prefix}*"),
            KeyMatcher::PrefixSuffix { prefix, suffix } => write!(f, "{prefix}*{suffix}"),
            KeyMatcher::Leading { count } => write!(f, "first {count}"),
            KeyMatcher::KeepPrefix { prefix } => write!(f, "not {prefix}*"),
            KeyMatcher::Regex { pattern } => write!(f, "/{pattern}/"),
        }
    }
}

/// One filter rule.
#[derive(new, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Precedence class.
    pub stage: FilterStage,
    /// Drop or route.
    pub action: FilterAction,
    /// Selected keys.
    pub matcher: KeyMatcher,
}

/// Literal substring substitution into the shared vocabulary.
#[derive(new, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rewrite {
    /// Native spelling.
    pub from: String,
    /// Shared spelling.
    pub to: String,
}

/// How the retained keys are ordered before pairing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrder {
    /// Keep the order the network reports.
    #[default]
    Native,
    /// Numeric-aware sort of the folded keys.
    Natural,
}

/// A pair transferred outside the positional walk.
#[derive(new, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMapping {
    /// Key in the source network.
    pub source_key: String,
    /// Key in the destination network.
    pub destination_key: String,
}

/// An auxiliary key with a fixed destination.
#[derive(new, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedAuxiliary {
    /// Auxiliary source key.
    pub source_key: String,
    /// Module path in the destination.
    pub path: Vec<String>,
    /// Field of that module.
    pub field: String,
    /// Storage dtype, if it differs from the field's.
    #[serde(default)]
    pub dtype: Option<DType>,
}

/// How auxiliary keys of one role find their destination.
///
/// The owner of an auxiliary key is the key without its leaf. Source keys ending with
/// `source_anchor` give, once `source_strip` tokens are removed, the owners in ordered
/// position; the destination keys ending with `destination_anchor` at the same position,
/// without their last `destination_strip` tokens, give the module path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryRule {
    /// Role handled by the rule.
    pub role: AuxRole,
    /// Suffix of the source anchor keys.
    pub source_anchor: String,
    /// Tokens removed from a source anchor to obtain its owner.
    pub source_strip: usize,
    /// Suffix of the destination anchor keys.
    pub destination_anchor: String,
    /// Tokens removed from a destination anchor to obtain its module path.
    pub destination_strip: usize,
    /// Destination field receiving the value.
    pub field: String,
    /// Storage dtype, if it differs from the field's.
    #[serde(default)]
    pub dtype: Option<DType>,
}

/// A source key whose trailing singleton dims are removed before comparison.
#[derive(new, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqueezeException {
    /// Source key.
    pub source_key: String,
    /// Number of trailing dims.
    pub count: usize,
}

/// Declarative knowledge about one conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureProfile {
    /// Identifier used in logs and errors.
    pub name: String,
    /// Source representation.
    pub source_framework: Framework,
    /// Destination representation.
    pub destination_framework: Framework,
    /// Source architectures covered, empty for any.
    #[serde(default)]
    pub source_models: Vec<String>,
    /// Destination architectures covered, empty for any.
    #[serde(default)]
    pub destination_models: Vec<String>,
    /// Rules applied to the source keys.
    #[serde(default)]
    pub source_filter: Vec<FilterRule>,
    /// Rules applied to the destination keys.
    #[serde(default)]
    pub destination_filter: Vec<FilterRule>,
    /// Rewrites folding source keys before sorting.
    #[serde(default)]
    pub source_rewrites: Vec<Rewrite>,
    /// Rewrites folding destination keys before sorting.
    #[serde(default)]
    pub destination_rewrites: Vec<Rewrite>,
    /// Ordering of the retained keys, if the profile imposes one.
    #[serde(default)]
    pub order: Option<KeyOrder>,
    /// Pairs transferred by name.
    #[serde(default)]
    pub direct: Vec<DirectMapping>,
    /// Auxiliary keys with fixed destinations.
    #[serde(default)]
    pub pinned: Vec<PinnedAuxiliary>,
    /// Resolution rules for auxiliary keys.
    #[serde(default)]
    pub auxiliary: Vec<AuxiliaryRule>,
    /// Named squeeze exceptions.
    #[serde(default)]
    pub squeeze: Vec<SqueezeException>,
    /// Allow fewer source keys than destination keys.
    #[serde(default)]
    pub allow_partial: bool,
    /// Require matching leaf tokens for every aligned pair.
    #[serde(default)]
    pub check_roles: bool,
}

impl ArchitectureProfile {
    /// An empty profile for a pair of frameworks.
    pub fn new(name: impl Into<String>, source: Framework, destination: Framework) -> Self {
        Self {
            name: name.into(),
            source_framework: source,
            destination_framework: destination,
            source_models: Vec::new(),
            destination_models: Vec::new(),
            source_filter: Vec::new(),
            destination_filter: Vec::new(),
            source_rewrites: Vec::new(),
            destination_rewrites: Vec::new(),
            order: None,
            direct: Vec::new(),
            pinned: Vec::new(),
            auxiliary: Vec::new(),
            squeeze: Vec::new(),
            allow_partial: false,
            check_roles: false,
        }
    }

    /// Restrict to these source architectures.
    pub fn with_source_models<S: AsRef<str>>(mut self, models: &[S]) -> Self {
        self.source_models = models.iter().map(|m| m.as_ref().to_string()).collect();
        self
    }

    /// Restrict to these destination architectures.
    pub fn with_destination_models<S: AsRef<str>>(mut self, models: &[S]) -> Self {
        self.destination_models = models.iter().map(|m| m.as_ref().to_string()).collect();
        self
    }

    /// Add a source filter rule.
    pub fn with_source_rule(
        mut self,
        stage: FilterStage,
        action: FilterAction,
        matcher: KeyMatcher,
    ) -> Self {
        self.source_filter.push(FilterRule::new(stage, action, matcher));
        self
    }

    /// Add a destination filter rule.
    pub fn with_destination_rule(
        mut self,
        stage: FilterStage,
        action: FilterAction,
        matcher: KeyMatcher,
    ) -> Self {
        self.destination_filter
            .push(FilterRule::new(stage, action, matcher));
        self
    }

    /// Add a source rewrite.
    pub fn with_source_rewrite(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.source_rewrites.push(Rewrite::new(from.into(), to.into()));
        self
    }

    /// Add a destination rewrite.
    pub fn with_destination_rewrite(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.destination_rewrites
            .push(Rewrite::new(from.into(), to.into()));
        self
    }

    /// Impose an ordering.
    pub fn with_order(mut self, order: KeyOrder) -> Self {
        self.order = Some(order);
        self
    }

    /// Add a pair transferred by name.
    pub fn with_direct(
        mut self,
        source_key: impl Into<String>,
        destination_key: impl Into<String>,
    ) -> Self {
        self.direct
            .push(DirectMapping::new(source_key.into(), destination_key.into()));
        self
    }

    /// Add a pinned auxiliary key.
    pub fn with_pinned(mut self, pinned: PinnedAuxiliary) -> Self {
        self.pinned.push(pinned);
        self
    }

    /// Add an auxiliary resolution rule.
    pub fn with_auxiliary(mut self, rule: AuxiliaryRule) -> Self {
        self.auxiliary.push(rule);
        self
    }

    /// Add a squeeze exception.
    pub fn with_squeeze(mut self, source_key: impl Into<String>, count: usize) -> Self {
        self.squeeze
            .push(SqueezeException::new(source_key.into(), count));
        self
    }

    /// Allow fewer source keys than destination keys.
    pub fn with_partial(mut self) -> Self {
        self.allow_partial = true;
        self
    }

    /// Check leaf tokens of every aligned pair.
    pub fn with_role_check(mut self) -> Self {
        self.check_roles = true;
        self
    }

    /// Whether the profile covers every model of its framework pair.
    pub fn is_pair_profile(&self) -> bool {
        self.source_models.is_empty() && self.destination_models.is_empty()
    }

    /// Whether the profile applies to this conversion.
    pub fn applies_to(
        &self,
        source: Framework,
        destination: Framework,
        source_model: &str,
        destination_model: &str,
    ) -> bool {
        self.source_framework == source
            && self.destination_framework == destination
            && (self.source_models.is_empty()
                || self.source_models.iter().any(|m| m == source_model))
            && (self.destination_models.is_empty()
                || self.destination_models.iter().any(|m| m == destination_model))
    }

    /// Check the tables for entries that cannot work on any key list.
    pub fn validate(&self) -> Result<(), ConvertError> {
        let invalid = |reason: String| ConvertError::InvalidProfile {
            name: self.name.clone(),
            reason,
        };

        for rule in self.source_filter.iter().chain(self.destination_filter.iter()) {
            match &rule.matcher {
                KeyMatcher::Suffix { suffix: value }
                | KeyMatcher::Prefix { prefix: value }
                | KeyMatcher::KeepPrefix { prefix: value }
                    if value.is_empty() =>
                {
                    return Err(invalid(format!("empty matcher in rule {}", rule.matcher)));
                }
                KeyMatcher::PrefixSuffix { prefix, suffix }
                    if prefix.is_empty() && suffix.is_empty() =>
                {
                    return Err(invalid("empty prefix and suffix".to_string()));
                }
                KeyMatcher::Leading { count: 0 } => {
                    return Err(invalid("leading rule with a zero count".to_string()));
                }
                KeyMatcher::Regex { pattern } => {
                    Regex::new(pattern)
                        .map_err(|err| invalid(format!("invalid pattern `{pattern}`: {err}")))?;
                }
                _ => {}
            }
        }

        for rewrite in self.source_rewrites.iter().chain(self.destination_rewrites.iter()) {
            if rewrite.from.is_empty() || rewrite.to.is_empty() {
                return Err(invalid(format!(
                    "rewrite `{}` -> `{}` has an empty side",
                    rewrite.from, rewrite.to
                )));
            }
            if rewrite.from == rewrite.to {
                return Err(invalid(format!("rewrite `{}` maps onto itself", rewrite.from)));
            }
        }

        for direct in self.direct.iter() {
            if direct.source_key.is_empty() || direct.destination_key.is_empty() {
                return Err(invalid("direct mapping with an empty key".to_string()));
            }
        }

        for pinned in self.pinned.iter() {
            if pinned.source_key.is_empty() || pinned.field.is_empty() {
                return Err(invalid("pinned auxiliary with an empty key or field".to_string()));
            }
        }

        for rule in self.auxiliary.iter() {
            if rule.source_strip == 0 || rule.destination_strip == 0 {
                return Err(invalid(format!("zero strip depth for role {}", rule.role)));
            }
            if rule.source_anchor.is_empty() || rule.destination_anchor.is_empty() {
                return Err(invalid(format!("empty anchor for role {}", rule.role)));
            }
        }

        for squeeze in self.squeeze.iter() {
            if squeeze.count == 0 {
                return Err(invalid(format!(
                    "zero squeeze count for `{}`",
                    squeeze.source_key
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_to_listed_models_only() {
        let profile = ArchitectureProfile::new("resnet_v1", Framework::Gluon, Framework::PyTorch)
            .with_source_models(&["resnet50_v1"]);

        let gluon_pytorch = (Framework::Gluon, Framework::PyTorch);
        assert!(profile.applies_to(gluon_pytorch.0, gluon_pytorch.1, "resnet50_v1", "resnet50"));
        assert!(!profile.applies_to(gluon_pytorch.0, gluon_pytorch.1, "resnet18_v1", "resnet18"));
        assert!(!profile.applies_to(
            Framework::Gluon,
            Framework::Chainer,
            "resnet50_v1",
            "resnet50"
        ));
        assert!(!profile.is_pair_profile());
    }

    #[test]
    fn validate_rejects_identity_rewrite() {
        let profile = ArchitectureProfile::new("bad", Framework::Gluon, Framework::Chainer)
            .with_destination_rewrite("/W", "/W");

        assert!(matches!(
            profile.validate(),
            Err(ConvertError::InvalidProfile { name, .. }) if name == "bad"
        ));
    }

    #[test]
    fn validate_rejects_zero_strip_depth() {
        let profile = ArchitectureProfile::new("bad", Framework::Gluon, Framework::Chainer)
            .with_auxiliary(AuxiliaryRule {
                role: AuxRole::RunningMean,
                source_anchor: ".beta".to_string(),
                source_strip: 0,
                destination_anchor: "/beta".to_string(),
                destination_strip: 1,
                field: "avg_mean".to_string(),
                dtype: None,
            });

        assert!(profile.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_pattern() {
        let profile = ArchitectureProfile::new("bad", Framework::PyTorch, Framework::Gluon)
            .with_source_rule(
                FilterStage::Bookkeeping,
                FilterAction::Drop,
                KeyMatcher::Regex {
                    pattern: "(".to_string(),
                },
            );

        assert!(profile.validate().is_err());
    }

    #[test]
    fn deserialize_from_json() {
        let json = r#"{
            "name": "custom",
            "source_framework": "mxnet",
            "destination_framework": "gluon",
            "source_models": ["tiny"],
            "source_filter": [
                {
                    "stage": "structural_prefix",
                    "action": {"type": "drop"},
                    "matcher": {"type": "leading", "count": 2}
                }
            ],
            "order": "natural",
            "squeeze": [{"source_key": "fc_weight", "count": 2}]
        }"#;

        let profile: ArchitectureProfile = serde_json::from_str(json).unwrap();

        assert_eq!(profile.source_framework, Framework::MxNet);
        assert_eq!(profile.order, Some(KeyOrder::Natural));
        assert_eq!(
            profile.source_filter[0].matcher,
            KeyMatcher::Leading { count: 2 }
        );
        assert_eq!(profile.squeeze[0], SqueezeException::new("fc_weight".to_string(), 2));
        assert!(profile.validate().is_ok());
    }
}
