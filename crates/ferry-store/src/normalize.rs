use core::cmp::Ordering;

use hashbrown::HashMap;

use crate::profile::{KeyOrder, Rewrite};
use crate::ConvertError;

const DIGIT_WIDTH: usize = 10;

/// Sort key of the natural order.
///
/// Each non-digit character is its own token; digit runs become right-aligned,
/// fixed-width tokens, so runs compare numerically.
pub fn natural_key(key: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut digits = String::new();

    for c in key.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if !digits.is_empty() {
            tokens.push(pad_digits(&digits));
            digits.clear();
        }
        tokens.push(c.to_string());
    }
    if !digits.is_empty() {
        tokens.push(pad_digits(&digits));
    }

    tokens
}

fn pad_digits(run: &str) -> String {
    let trimmed = run.trim_start_matches('0');
    let trimmed = if trimmed.is_empty() { "0" } else { trimmed };
    format!("{:>width$}", trimmed, width = DIGIT_WIDTH)
}

/// Natural order, ties broken by plain string order.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key(a)
        .cmp(&natural_key(b))
        .then_with(|| a.cmp(b))
}

/// Sort keys in natural order.
pub fn sort_natural<S: AsRef<str>>(keys: &mut [S]) {
    keys.sort_by_cached_key(|key| (natural_key(key.as_ref()), key.as_ref().to_string()));
}

/// Ordered literal substitutions between a native spelling and the shared vocabulary.
#[derive(Debug, Clone, Default)]
pub struct RewriteTable {
    rewrites: Vec<Rewrite>,
}

impl RewriteTable {
    /// Create a table; rewrites are folded in order and unfolded in reverse.
    pub fn new(rewrites: Vec<Rewrite>) -> Self {
        Self { rewrites }
    }

    /// Whether the table rewrites nothing.
    pub fn is_empty(&self) -> bool {
        self.rewrites.is_empty()
    }

    /// Native spelling to shared vocabulary.
    pub fn fold(&self, key: &str) -> String {
        self.rewrites
            .iter()
            .fold(key.to_string(), |key, rewrite| key.replace(&rewrite.from, &rewrite.to))
    }

    /// Shared vocabulary to native spelling.
    pub fn unfold(&self, key: &str) -> String {
        self.rewrites
            .iter()
            .rev()
            .fold(key.to_string(), |key, rewrite| key.replace(&rewrite.to, &rewrite.from))
    }

    /// Fold every key, checking that the table is lossless on this key list.
    pub fn fold_all(&self, keys: &[String]) -> Result<Vec<String>, ConvertError> {
        let mut seen: HashMap<String, &str> = HashMap::with_capacity(keys.len());
        let mut folded = Vec::with_capacity(keys.len());

        for key in keys {
            let shared = self.fold(key);
            let restored = self.unfold(&shared);
            if &restored != key {
                return Err(ConvertError::InvalidRewrite {
                    key: key.clone(),
                    reason: format!("folds to `{shared}` which unfolds to `{restored}`"),
                });
            }
            if let Some(other) = seen.insert(shared.clone(), key) {
                return Err(ConvertError::InvalidRewrite {
                    key: key.clone(),
                    reason: format!("folds to `{shared}` like `{other}`"),
                });
            }
            folded.push(shared);
        }

        Ok(folded)
    }

    /// Order keys, keeping their native spelling.
    ///
    /// The sort uses the folded form of every key.
    pub fn order(&self, keys: Vec<String>, order: KeyOrder) -> Result<Vec<String>, ConvertError> {
        let folded = self.fold_all(&keys)?;

        match order {
            KeyOrder::Native => Ok(keys),
            KeyOrder::Natural => {
                let mut pairs: Vec<(String, String)> = folded.into_iter().zip(keys).collect();
                pairs.sort_by_cached_key(|(shared, _)| (natural_key(shared), shared.clone()));
                Ok(pairs.into_iter().map(|(_, native)| native).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|key| key.to_string()).collect()
    }

    #[test]
    fn natural_sort_compares_digit_runs_numerically() {
        let mut keys = strings(&["stage10_unit1", "stage2_unit10", "stage2_unit9"]);

        sort_natural(&mut keys);

        assert_eq!(keys, strings(&["stage2_unit9", "stage2_unit10", "stage10_unit1"]));
    }

    #[test]
    fn natural_sort_orders_every_unit_within_its_stage() {
        let mut expected = Vec::new();
        for stage in 1..=99 {
            for unit in 1..=99 {
                expected.push(format!("stage{stage}_unit{unit}"));
            }
        }
        let mut keys = expected.clone();
        keys.reverse();

        sort_natural(&mut keys);

        assert_eq!(keys, expected);
    }

    #[test]
    fn leading_zeros_do_not_change_rank() {
        assert_eq!(natural_key("unit007"), natural_key("unit7"));
        assert_eq!(natural_cmp("unit007", "unit7"), Ordering::Less);
        assert_eq!(natural_cmp("unit7", "unit10"), Ordering::Less);
    }

    #[test]
    fn natural_cmp_is_a_total_order() {
        let mut keys = strings(&["a.b", "a1", "a", "a.10", "a.9", "a_2"]);
        keys.sort_by(|a, b| natural_cmp(a, b));
        let mut again = keys.clone();
        sort_natural(&mut again);

        assert_eq!(keys, again);
    }

    #[test]
    fn fold_and_unfold_are_inverse() {
        let table = RewriteTable::new(vec![
            Rewrite::new("_conv1_".to_string(), ".conv1.conv.".to_string()),
            Rewrite::new("_bn1_".to_string(), ".conv1.bn.".to_string()),
        ]);

        let shared = table.fold("stage1_unit1_conv1_weight");

        assert_eq!(shared, "stage1_unit1.conv1.conv.weight");
        assert_eq!(table.unfold(&shared), "stage1_unit1_conv1_weight");
    }

    #[test]
    fn fold_all_rejects_lossy_keys() {
        let table = RewriteTable::new(vec![Rewrite::new("/W".to_string(), "/weight".to_string())]);

        let err = table
            .fold_all(&strings(&["/features/conv/W", "/features/conv/weight"]))
            .unwrap_err();

        assert!(matches!(
            err,
            ConvertError::InvalidRewrite { key, .. } if key == "/features/conv/weight"
        ));
    }

    #[test]
    fn order_sorts_folded_keys_but_keeps_native_spelling() {
        let table = RewriteTable::new(vec![
            Rewrite::new("/post_activ/".to_string(), "/stageN/post_activ/".to_string()),
            Rewrite::new("/W".to_string(), "/weight".to_string()),
        ]);
        let keys = strings(&[
            "/features/post_activ/bn/beta",
            "/features/stage2/unit1/conv/W",
            "/features/stage1/unit1/conv/W",
        ]);

        let ordered = table.order(keys, KeyOrder::Natural).unwrap();

        assert_eq!(
            ordered,
            strings(&[
                "/features/stage1/unit1/conv/W",
                "/features/stage2/unit1/conv/W",
                "/features/post_activ/bn/beta",
            ])
        );
    }

    #[test]
    fn native_order_is_untouched() {
        let keys = strings(&["b.10", "b.9", "a.1"]);

        let ordered = RewriteTable::default()
            .order(keys.clone(), KeyOrder::Native)
            .unwrap();

        assert_eq!(ordered, keys);
    }
}
