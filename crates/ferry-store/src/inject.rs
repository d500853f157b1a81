use hashbrown::HashMap;

use crate::module::display_path;
use crate::profile::{AuxRole, AuxiliaryRule};
use crate::{ConvertError, DType, Framework, Network};

/// Locates the destination module of auxiliary keys of one role.
///
/// Auxiliary values have no flat key in the destination, so their location is inferred
/// from anchor siblings: the n-th source anchor and the n-th destination anchor of the
/// ordered walk belong to the same structural unit.
#[derive(Debug, Clone)]
pub struct AuxiliaryResolver {
    role: AuxRole,
    source_framework: Framework,
    owners: HashMap<String, usize>,
    paths: Vec<Vec<String>>,
}

impl AuxiliaryResolver {
    /// Build the owner and path tables from the ordered walk keys.
    pub fn new(
        rule: &AuxiliaryRule,
        source_framework: Framework,
        destination_framework: Framework,
        source_keys: &[String],
        destination_keys: &[String],
    ) -> Self {
        let owners = source_keys
            .iter()
            .filter(|key| key.ends_with(rule.source_anchor.as_str()))
            .filter_map(|key| strip_tokens(source_framework, key, rule.source_strip))
            .enumerate()
            .map(|(index, owner)| (source_framework.join_key(&owner), index))
            .collect();

        let paths = destination_keys
            .iter()
            .filter(|key| key.ends_with(rule.destination_anchor.as_str()))
            .filter_map(|key| strip_tokens(destination_framework, key, rule.destination_strip))
            .collect();

        Self {
            role: rule.role,
            source_framework,
            owners,
            paths,
        }
    }

    /// Role handled by this resolver.
    pub fn role(&self) -> AuxRole {
        self.role
    }

    /// Owner of an auxiliary key: the key without its leaf token.
    pub fn owner_of(&self, key: &str) -> String {
        let path = strip_tokens(self.source_framework, key, 1).unwrap_or_default();
        self.source_framework.join_key(&path)
    }

    /// Destination module path of an auxiliary key.
    pub fn resolve(&self, key: &str) -> Result<&[String], ConvertError> {
        let owner = self.owner_of(key);
        self.owners
            .get(&owner)
            .and_then(|index| self.paths.get(*index))
            .map(|path| path.as_slice())
            .ok_or(ConvertError::UnresolvedAuxiliary {
                key: key.to_string(),
                owner,
            })
    }
}

fn strip_tokens(framework: Framework, key: &str, count: usize) -> Option<Vec<String>> {
    let mut path = framework.split_key(key);
    if path.len() <= count {
        return None;
    }
    path.truncate(path.len() - count);
    Some(path)
}

/// Write the source tensor `source_key` into field `field` of the destination module at `path`.
///
/// The existing field must have the same shape. The value is stored as `dtype`, or as
/// the field's current dtype when none is given.
pub fn inject_field(
    source: &Network,
    destination: &mut Network,
    source_key: &str,
    path: &[String],
    field: &str,
    dtype: Option<DType>,
) -> Result<(), ConvertError> {
    let value = source.require(source_key)?;
    let existing = destination
        .resolve(path)?
        .field(field)
        .ok_or_else(|| ConvertError::MissingField {
            path: display_path(path),
            field: field.to_string(),
        })?;

    if existing.data.shape != value.shape {
        return Err(ConvertError::ShapeMismatch {
            source_key: source_key.to_string(),
            destination_key: format!("{}/{field}", display_path(path)),
            source_shape: value.shape.clone(),
            destination_shape: existing.data.shape.clone(),
        });
    }

    let value = value
        .clone()
        .convert(dtype.unwrap_or(existing.data.dtype))?;
    destination.assign_at(path, field, value)?;

    log::debug!("Injected {source_key} into {}.{field}", display_path(path));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TensorData;

    fn strings(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|key| key.to_string()).collect()
    }

    fn beta_rule() -> AuxiliaryRule {
        AuxiliaryRule {
            role: AuxRole::RunningMean,
            source_anchor: ".beta".to_string(),
            source_strip: 1,
            destination_anchor: "/beta".to_string(),
            destination_strip: 1,
            field: "avg_mean".to_string(),
            dtype: None,
        }
    }

    #[test]
    fn resolves_owner_through_anchor_position() {
        let resolver = AuxiliaryResolver::new(
            &beta_rule(),
            Framework::Gluon,
            Framework::Chainer,
            &strings(&["features.0.bn.beta", "features.0.bn.gamma", "features.1.unit.bn.beta"]),
            &strings(&[
                "/features/init/bn/beta",
                "/features/init/bn/gamma",
                "/features/stage1/unit1/bn/beta",
            ]),
        );

        assert_eq!(
            resolver.resolve("features.1.unit.bn.running_mean").unwrap(),
            ["features", "stage1", "unit1", "bn"]
        );
        assert_eq!(
            resolver.resolve("features.0.bn.running_mean").unwrap(),
            ["features", "init", "bn"]
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        let source = strings(&["a.bn.beta", "b.bn.beta", "c.bn.beta"]);
        let destination = strings(&["/x/bn/beta", "/y/bn/beta", "/z/bn/beta"]);
        let rule = beta_rule();
        let (gluon, chainer) = (Framework::Gluon, Framework::Chainer);
        let first = AuxiliaryResolver::new(&rule, gluon, chainer, &source, &destination);
        let second = AuxiliaryResolver::new(&rule, gluon, chainer, &source, &destination);

        for key in ["a.bn.running_mean", "b.bn.running_mean", "c.bn.running_mean"] {
            assert_eq!(first.resolve(key).unwrap(), second.resolve(key).unwrap());
        }
    }

    #[test]
    fn unknown_owner_is_an_error() {
        let resolver = AuxiliaryResolver::new(
            &beta_rule(),
            Framework::Gluon,
            Framework::Chainer,
            &strings(&["a.bn.beta"]),
            &strings(&["/x/bn/beta"]),
        );

        let err = resolver.resolve("b.bn.running_mean").unwrap_err();

        assert!(matches!(err, ConvertError::UnresolvedAuxiliary { owner, .. } if owner == "b.bn"));
    }

    #[test]
    fn inject_checks_shape_and_casts() {
        let mut source = Network::new(Framework::Gluon, "net");
        source.insert("output.1.index", TensorData::new(vec![2.0f32, 0.0, 1.0], [3]));
        let mut destination = Network::new(Framework::Chainer, "net");
        destination.insert("/output/fc/index", TensorData::zeros([3], DType::I32));
        destination.insert("/output/fc/W", TensorData::zeros([2, 2], DType::F32));
        let path = strings(&["output", "fc"]);

        inject_field(
            &source,
            &mut destination,
            "output.1.index",
            &path,
            "index",
            Some(DType::I32),
        )
        .unwrap();

        let fc = destination.resolve(&path).unwrap();
        assert_eq!(fc.field("index").unwrap().data.to_vec::<i32>().unwrap(), vec![2, 0, 1]);

        let err = inject_field(&source, &mut destination, "output.1.index", &path, "W", None)
            .unwrap_err();
        assert!(matches!(
            err,
            ConvertError::ShapeMismatch { destination_key, .. } if destination_key == "output/fc/W"
        ));
    }
}
