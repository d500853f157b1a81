use regex::Regex;

use crate::profile::{AuxRole, FilterAction, FilterRule, KeyMatcher};
use crate::ConvertError;

/// A key removed from the positional walk, with the rule that removed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedKey {
    /// The key.
    pub key: String,
    /// Description of the rule.
    pub rule: String,
}

/// Keys routed to one auxiliary role, in the order they were retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliarySet {
    /// The role.
    pub role: AuxRole,
    /// The keys.
    pub keys: Vec<String>,
}

/// Result of filtering a key list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilteredKeys {
    /// Keys kept for the positional walk.
    pub retained: Vec<String>,
    /// Keys routed by role.
    pub auxiliary: Vec<AuxiliarySet>,
    /// Keys left out.
    pub dropped: Vec<DroppedKey>,
}

impl FilteredKeys {
    /// Keys routed to `role`.
    pub fn auxiliary(&self, role: AuxRole) -> &[String] {
        self.auxiliary
            .iter()
            .find(|set| set.role == role)
            .map(|set| set.keys.as_slice())
            .unwrap_or_default()
    }

    fn route(&mut self, role: AuxRole, key: String) {
        match self.auxiliary.iter_mut().find(|set| set.role == role) {
            Some(set) => set.keys.push(key),
            None => self.auxiliary.push(AuxiliarySet {
                role,
                keys: vec![key],
            }),
        }
    }
}

enum Matcher {
    Suffix(String),
    Prefix(String),
    PrefixSuffix(String, String),
    Leading(usize),
    KeepPrefix(String),
    Regex(Regex),
}

impl Matcher {
    fn matches(&self, key: &str, position: usize) -> bool {
        match self {
            Matcher::Suffix(suffix) => key.ends_with(suffix.as_str()),
            Matcher::Prefix(prefix) => key.starts_with(prefix.as_str()),
            Matcher::PrefixSuffix(prefix, suffix) => {
                key.starts_with(prefix.as_str()) && key.ends_with(suffix.as_str())
            }
            Matcher::Leading(count) => position < *count,
            Matcher::KeepPrefix(prefix) => !key.starts_with(prefix.as_str()),
            Matcher::Regex(regex) => regex.is_match(key),
        }
    }
}

struct CompiledRule {
    action: FilterAction,
    matcher: Matcher,
    description: String,
}

/// Splits a key list into retained, auxiliary and dropped keys.
///
/// Rules run in stage order, registration order within a stage. Each rule sees only
/// the keys still retained by the previous ones. The input list is never modified.
pub struct KeyFilter {
    rules: Vec<CompiledRule>,
}

impl KeyFilter {
    /// Compile a rule list.
    pub fn new(rules: &[FilterRule]) -> Result<Self, ConvertError> {
        let mut sorted: Vec<&FilterRule> = rules.iter().collect();
        sorted.sort_by_key(|rule| rule.stage);

        let rules = sorted
            .into_iter()
            .map(|rule| {
                let matcher = match &rule.matcher {
                    KeyMatcher::Suffix { suffix } => Matcher::Suffix(suffix.clone()),
                    KeyMatcher::Prefix { prefix } => Matcher::Prefix(prefix.clone()),
                    KeyMatcher::PrefixSuffix { prefix, suffix } => {
                        Matcher::PrefixSuffix(prefix.clone(), suffix.clone())
                    }
                    KeyMatcher::Leading { count } => Matcher::Leading(*count),
                    KeyMatcher::KeepPrefix { prefix } => Matcher::KeepPrefix(prefix.clone()),
                    KeyMatcher::Regex { pattern } => {
                        Matcher::Regex(Regex::new(pattern).map_err(|err| {
                            ConvertError::InvalidProfile {
                                name: format!("filter {}", rule.matcher),
                                reason: err.to_string(),
                            }
                        })?)
                    }
                };
                let description = match &rule.action {
                    FilterAction::Drop => format!("{:?}: drop {}", rule.stage, rule.matcher),
                    FilterAction::Auxiliary { role } => {
                        format!("{:?}: route {} to {role}", rule.stage, rule.matcher)
                    }
                };
                Ok(CompiledRule {
                    action: rule.action.clone(),
                    matcher,
                    description,
                })
            })
            .collect::<Result<Vec<_>, ConvertError>>()?;

        Ok(Self { rules })
    }

    /// Whether the filter has no rule.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether every rule selects keys by spelling, so re-filtering is a no-op.
    pub fn is_idempotent(&self) -> bool {
        !self
            .rules
            .iter()
            .any(|rule| matches!(rule.matcher, Matcher::Leading(_)))
    }

    /// Filter `keys`.
    pub fn apply(&self, keys: &[String]) -> FilteredKeys {
        let mut result = FilteredKeys {
            retained: keys.to_vec(),
            ..Default::default()
        };

        for rule in self.rules.iter() {
            let current = core::mem::take(&mut result.retained);
            for (position, key) in current.into_iter().enumerate() {
                if !rule.matcher.matches(&key, position) {
                    result.retained.push(key);
                    continue;
                }
                match &rule.action {
                    FilterAction::Drop => {
                        log::debug!("Dropping key {key} ({})", rule.description);
                        result.dropped.push(DroppedKey {
                            key,
                            rule: rule.description.clone(),
                        });
                    }
                    FilterAction::Auxiliary { role } => {
                        log::debug!("Routing key {key} ({})", rule.description);
                        result.route(*role, key);
                    }
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::FilterStage;

    fn strings(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|key| key.to_string()).collect()
    }

    fn drop_rule(stage: FilterStage, matcher: KeyMatcher) -> FilterRule {
        FilterRule::new(stage, FilterAction::Drop, matcher)
    }

    fn route(role: AuxRole, suffix: &str) -> FilterRule {
        FilterRule::new(
            FilterStage::RunningStatistics,
            FilterAction::Auxiliary { role },
            KeyMatcher::suffix(suffix),
        )
    }

    #[test]
    fn routes_running_statistics() {
        let filter = KeyFilter::new(&[
            route(AuxRole::RunningMean, ".running_mean"),
            route(AuxRole::RunningVar, ".running_var"),
        ])
        .unwrap();

        let filtered = filter.apply(&strings(&[
            "features.0.bn.gamma",
            "features.0.bn.beta",
            "features.0.bn.running_mean",
            "features.0.bn.running_var",
        ]));

        assert_eq!(filtered.retained, strings(&["features.0.bn.gamma", "features.0.bn.beta"]));
        assert_eq!(filtered.auxiliary(AuxRole::RunningMean), ["features.0.bn.running_mean"]);
        assert_eq!(filtered.auxiliary(AuxRole::RunningVar), ["features.0.bn.running_var"]);
        assert!(filtered.auxiliary(AuxRole::StructuralIndex).is_empty());
        assert!(filtered.dropped.is_empty());
    }

    #[test]
    fn stages_run_in_precedence_order() {
        // The leading rule is registered last but belongs to an earlier stage than the
        // bookkeeping rule, so it counts positions before the counters are removed.
        let filter = KeyFilter::new(&[
            drop_rule(FilterStage::Bookkeeping, KeyMatcher::suffix("num_batches_tracked")),
            drop_rule(FilterStage::StructuralPrefix, KeyMatcher::Leading { count: 2 }),
        ])
        .unwrap();

        let filtered = filter.apply(&strings(&[
            "stem.weight",
            "stem.num_batches_tracked",
            "body.weight",
            "body.num_batches_tracked",
        ]));

        assert_eq!(filtered.retained, strings(&["body.weight"]));
        assert_eq!(filtered.dropped.len(), 3);
        assert_eq!(filtered.dropped[0].key, "stem.weight");
    }

    #[test]
    fn prefix_suffix_drops_bias_only_in_features() {
        let filter = KeyFilter::new(&[drop_rule(
            FilterStage::BiasConvention,
            KeyMatcher::prefix_suffix("features.", ".bias"),
        )])
        .unwrap();

        let filtered = filter.apply(&strings(&[
            "features.0.bias",
            "features.0.weight",
            "output.bias",
        ]));

        assert_eq!(filtered.retained, strings(&["features.0.weight", "output.bias"]));
    }

    #[test]
    fn keep_prefix_drops_everything_else() {
        let filter = KeyFilter::new(&[drop_rule(
            FilterStage::StructuralPrefix,
            KeyMatcher::keep_prefix("stage"),
        )])
        .unwrap();

        let filtered = filter.apply(&strings(&[
            "conv0_weight",
            "stage1_unit1_bn1_gamma",
            "fc1_bias",
        ]));

        assert_eq!(filtered.retained, strings(&["stage1_unit1_bn1_gamma"]));
    }

    #[test]
    fn unknown_keys_pass_through() {
        let filter = KeyFilter::new(&[drop_rule(
            FilterStage::Bookkeeping,
            KeyMatcher::Regex {
                pattern: r"\.num_batches_tracked$".to_string(),
            },
        )])
        .unwrap();
        let keys = strings(&["a.weight", "b.bias"]);

        assert_eq!(filter.apply(&keys).retained, keys);
    }

    #[test]
    fn positional_rules_are_not_idempotent() {
        let by_name = KeyFilter::new(&[drop_rule(
            FilterStage::Bookkeeping,
            KeyMatcher::suffix("x"),
        )])
        .unwrap();
        let by_position = KeyFilter::new(&[drop_rule(
            FilterStage::StructuralPrefix,
            KeyMatcher::Leading { count: 1 },
        )])
        .unwrap();

        assert!(by_name.is_idempotent());
        assert!(!by_position.is_idempotent());
    }
}
