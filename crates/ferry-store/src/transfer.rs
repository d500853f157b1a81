use core::fmt;

use hashbrown::HashSet;

use crate::filter::DroppedKey;
use crate::inject::{inject_field, AuxiliaryResolver};
use crate::profile::AuxRole;
use crate::registry::ConversionPlan;
use crate::session::ConversionSession;
use crate::{ConvertError, Network};

/// How a destination tensor received its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Named pair of the plan.
    Direct,
    /// Pair of the positional walk.
    Positional,
    /// Positional pair whose trailing singleton dims were removed.
    Squeezed,
}

/// One tensor copied from the source to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTransfer {
    /// Source key.
    pub source_key: String,
    /// Destination key.
    pub destination_key: String,
    /// How the pair was formed.
    pub kind: TransferKind,
}

/// One auxiliary value written into a destination field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedField {
    /// Auxiliary source key.
    pub source_key: String,
    /// Module path in the destination.
    pub path: Vec<String>,
    /// Field written.
    pub field: String,
    /// Role of the source key.
    pub role: Option<AuxRole>,
}

/// Outcome of a transfer.
#[derive(Debug, Clone, Default)]
pub struct TransferReport {
    /// Tensors copied, in order.
    pub applied: Vec<AppliedTransfer>,
    /// Auxiliary values injected, in order.
    pub injected: Vec<InjectedField>,
    /// Keys the filters left out, source side first. Keys of direct pairs are not listed.
    pub dropped: Vec<DroppedKey>,
    /// Retained destination keys that kept their default value.
    pub missing: Vec<String>,
}

impl TransferReport {
    /// Number of destination tensors and fields written.
    pub fn written(&self) -> usize {
        self.applied.len() + self.injected.len()
    }

    /// Whether every retained destination key was written.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Transfer report")?;
        writeln!(f, "  applied:  {}", self.applied.len())?;
        writeln!(f, "  injected: {}", self.injected.len())?;
        writeln!(f, "  dropped:  {}", self.dropped.len())?;
        write!(f, "  missing:  {}", self.missing.len())?;
        for key in self.missing.iter() {
            write!(f, "\n    {key}")?;
        }
        Ok(())
    }
}

/// Copies tensors along a prepared session.
///
/// Order: direct pairs, the positional walk, then pinned and resolved auxiliary values.
/// Every destination is written at most once. A failure leaves the destination partly
/// written; the caller must not persist it.
pub struct TransferEngine<'a> {
    plan: &'a ConversionPlan,
}

impl<'a> TransferEngine<'a> {
    /// Create an engine for a plan.
    pub fn new(plan: &'a ConversionPlan) -> Self {
        Self { plan }
    }

    /// Run the transfer.
    pub fn run(
        &self,
        session: &ConversionSession,
        source: &Network,
        destination: &mut Network,
    ) -> Result<TransferReport, ConvertError> {
        let direct_sources: HashSet<&str> =
            self.plan.direct.iter().map(|direct| direct.source_key.as_str()).collect();
        let direct_destinations: HashSet<&str> = self
            .plan
            .direct
            .iter()
            .map(|direct| direct.destination_key.as_str())
            .collect();
        let mut report = TransferReport {
            dropped: session
                .source_dropped
                .iter()
                .filter(|dropped| !direct_sources.contains(dropped.key.as_str()))
                .chain(
                    session
                        .destination_dropped
                        .iter()
                        .filter(|dropped| !direct_destinations.contains(dropped.key.as_str())),
                )
                .cloned()
                .collect(),
            ..Default::default()
        };
        let mut written: HashSet<String> = HashSet::new();

        for direct in self.plan.direct.iter() {
            self.copy(
                source,
                destination,
                &direct.source_key,
                &direct.destination_key,
                TransferKind::Direct,
                &mut written,
                &mut report,
            )?;
        }

        for (source_key, destination_key) in session.pairs() {
            let kind = match self.plan.squeeze_count(source_key) {
                Some(_) => TransferKind::Squeezed,
                None => TransferKind::Positional,
            };
            self.copy(
                source,
                destination,
                source_key,
                destination_key,
                kind,
                &mut written,
                &mut report,
            )?;
        }

        self.inject(session, source, destination, &mut written, &mut report)?;

        report.missing = session
            .destination_keys
            .iter()
            .filter(|key| !written.contains(key.as_str()))
            .cloned()
            .collect();

        if !report.missing.is_empty() {
            if !self.plan.allow_partial {
                return Err(ConvertError::Uncovered(report.missing));
            }
            for key in report.missing.iter() {
                log::warn!("Destination {key} keeps its default initialization");
            }
        }

        log::info!(
            "Transferred {} tensors and injected {} fields",
            report.applied.len(),
            report.injected.len()
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn copy(
        &self,
        source: &Network,
        destination: &mut Network,
        source_key: &str,
        destination_key: &str,
        kind: TransferKind,
        written: &mut HashSet<String>,
        report: &mut TransferReport,
    ) -> Result<(), ConvertError> {
        let mut value = source.require(source_key)?.clone();
        if let Some(count) = self.plan.squeeze_count(source_key) {
            value = value.squeeze_trailing(count)?;
        }

        let target = destination.require(destination_key)?;
        if value.shape != target.shape {
            return Err(ConvertError::ShapeMismatch {
                source_key: source_key.to_string(),
                destination_key: destination_key.to_string(),
                source_shape: value.shape,
                destination_shape: target.shape.clone(),
            });
        }

        if self.plan.check_roles {
            let source_role = source.framework().leaf(source_key);
            let destination_role = destination.framework().leaf(destination_key);
            if source_role != destination_role {
                return Err(ConvertError::RoleMismatch {
                    source_key: source_key.to_string(),
                    destination_key: destination_key.to_string(),
                    source_role: source_role.to_string(),
                    destination_role: destination_role.to_string(),
                });
            }
        }

        if !written.insert(destination_key.to_string()) {
            return Err(ConvertError::DuplicateWrite(destination_key.to_string()));
        }

        let value = value.convert(target.dtype)?;
        destination.assign(destination_key, value)?;

        log::debug!("Copied {source_key} -> {destination_key}");
        report.applied.push(AppliedTransfer {
            source_key: source_key.to_string(),
            destination_key: destination_key.to_string(),
            kind,
        });
        Ok(())
    }

    fn inject(
        &self,
        session: &ConversionSession,
        source: &Network,
        destination: &mut Network,
        written: &mut HashSet<String>,
        report: &mut TransferReport,
    ) -> Result<(), ConvertError> {
        for pinned in self.plan.pinned.iter() {
            let role = session
                .auxiliary
                .iter()
                .find(|set| set.keys.contains(&pinned.source_key))
                .map(|set| set.role);
            Self::mark(destination, written, &pinned.path, &pinned.field)?;
            inject_field(
                source,
                destination,
                &pinned.source_key,
                &pinned.path,
                &pinned.field,
                pinned.dtype,
            )?;
            report.injected.push(InjectedField {
                source_key: pinned.source_key.clone(),
                path: pinned.path.clone(),
                field: pinned.field.clone(),
                role,
            });
        }

        for set in session.auxiliary.iter() {
            let keys: Vec<&String> = set
                .keys
                .iter()
                .filter(|key| !self.plan.pinned.iter().any(|pinned| &pinned.source_key == *key))
                .collect();
            if keys.is_empty() {
                continue;
            }

            let rule = self
                .plan
                .auxiliary
                .iter()
                .find(|rule| rule.role == set.role)
                .ok_or_else(|| ConvertError::UnresolvedAuxiliary {
                    key: keys[0].clone(),
                    owner: format!("<no rule for role {}>", set.role),
                })?;
            let resolver = AuxiliaryResolver::new(
                rule,
                source.framework(),
                destination.framework(),
                &session.source_keys,
                &session.destination_keys,
            );

            for key in keys {
                let path = resolver.resolve(key)?.to_vec();
                Self::mark(destination, written, &path, &rule.field)?;
                inject_field(source, destination, key, &path, &rule.field, rule.dtype)?;
                report.injected.push(InjectedField {
                    source_key: key.clone(),
                    path,
                    field: rule.field.clone(),
                    role: Some(set.role),
                });
            }
        }

        Ok(())
    }

    /// Records a field write under its flat destination key, the form `copy` records.
    fn mark(
        destination: &Network,
        written: &mut HashSet<String>,
        path: &[String],
        field: &str,
    ) -> Result<(), ConvertError> {
        let mut tokens: Vec<&str> = path.iter().map(String::as_str).collect();
        tokens.push(field);
        let target = destination.framework().join_key(&tokens);
        if written.insert(target.clone()) {
            Ok(())
        } else {
            Err(ConvertError::DuplicateWrite(target))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{FilterAction, FilterStage, KeyMatcher, PinnedAuxiliary};
    use crate::{DType, Framework, ProfileRegistry, TensorData};

    fn filled(value: f32, shape: &[usize]) -> TensorData {
        let count = shape.iter().product();
        TensorData::new(vec![value; count], shape.to_vec())
    }

    #[test]
    fn positional_walk_copies_values_and_casts_to_destination_dtype() {
        let plan = ProfileRegistry::builtin()
            .plan(Framework::Gluon, Framework::PyTorch, "net", "net")
            .unwrap();
        let mut source = Network::new(Framework::Gluon, "net");
        source.insert("features.0.weight", filled(1.5, &[2, 3]));
        source.insert("features.0.bias", filled(2.5, &[2]));
        let mut destination = Network::new(Framework::PyTorch, "net");
        destination.insert("conv.weight", TensorData::zeros([2, 3], DType::F64));
        destination.insert("conv.bias", TensorData::zeros([2], DType::F64));

        let session = ConversionSession::prepare(&plan, &source, &destination).unwrap();
        let report = TransferEngine::new(&plan)
            .run(&session, &source, &mut destination)
            .unwrap();

        assert_eq!(report.applied.len(), 2);
        assert!(report.is_complete());
        let weight = destination.tensor("conv.weight").unwrap();
        assert_eq!(weight.dtype, DType::F64);
        assert_eq!(weight.to_vec::<f64>().unwrap(), vec![1.5; 6]);
    }

    #[test]
    fn role_check_rejects_weight_against_bias() {
        let plan = ProfileRegistry::builtin()
            .plan(Framework::Gluon, Framework::Gluon, "net", "net")
            .unwrap();
        let mut source = Network::new(Framework::Gluon, "net");
        source.insert("a.weight", filled(1.0, &[2]));
        let mut destination = Network::new(Framework::Gluon, "net");
        destination.insert("a.bias", filled(0.0, &[2]));

        let session = ConversionSession::prepare(&plan, &source, &destination).unwrap();
        let err = TransferEngine::new(&plan)
            .run(&session, &source, &mut destination)
            .unwrap_err();

        assert!(matches!(
            err,
            ConvertError::RoleMismatch { source_role, destination_role, .. }
                if source_role == "weight" && destination_role == "bias"
        ));
    }

    #[test]
    fn named_squeeze_reshapes_the_head() {
        let plan = ProfileRegistry::builtin()
            .plan(
                Framework::PyTorch,
                Framework::PyTorch,
                "oth_shufflenetv2_wd2",
                "shufflenetv2_wd2",
            )
            .unwrap();
        let mut source = Network::new(Framework::PyTorch, "oth_shufflenetv2_wd2");
        source.insert("network.0.weight", filled(9.0, &[4]));
        source.insert("network.8.weight", filled(3.0, &[10, 4, 1, 1]));
        let mut destination = Network::new(Framework::PyTorch, "shufflenetv2_wd2");
        destination.insert("output.weight", filled(0.0, &[10, 4]));

        let session = ConversionSession::prepare(&plan, &source, &destination).unwrap();
        let report = TransferEngine::new(&plan)
            .run(&session, &source, &mut destination)
            .unwrap();

        assert_eq!(report.applied[0].kind, TransferKind::Squeezed);
        assert_eq!(destination.tensor("output.weight").unwrap().shape, vec![10, 4]);
    }

    #[test]
    fn squeeze_is_not_inferred_from_shape() {
        let plan = ProfileRegistry::builtin()
            .plan(Framework::PyTorch, Framework::PyTorch, "net", "net")
            .unwrap();
        let mut source = Network::new(Framework::PyTorch, "net");
        source.insert("network.8.weight", filled(3.0, &[10, 4, 1, 1]));
        let mut destination = Network::new(Framework::PyTorch, "net");
        destination.insert("output.weight", filled(0.0, &[10, 4]));

        let session = ConversionSession::prepare(&plan, &source, &destination).unwrap();
        let err = TransferEngine::new(&plan)
            .run(&session, &source, &mut destination)
            .unwrap_err();

        assert!(matches!(err, ConvertError::ShapeMismatch { .. }));
    }

    #[test]
    fn direct_and_positional_writes_must_not_overlap() {
        let profile = crate::ArchitectureProfile::new("overlap", Framework::Gluon, Framework::Gluon)
            .with_direct("a.weight", "b.weight");
        let mut registry = ProfileRegistry::empty();
        registry.register(profile).unwrap();
        let plan = registry
            .plan(Framework::Gluon, Framework::Gluon, "net", "net")
            .unwrap();
        let mut source = Network::new(Framework::Gluon, "net");
        source.insert("a.weight", filled(1.0, &[2]));
        let mut destination = Network::new(Framework::Gluon, "net");
        destination.insert("b.weight", filled(0.0, &[2]));

        let session = ConversionSession::prepare(&plan, &source, &destination).unwrap();
        let err = TransferEngine::new(&plan)
            .run(&session, &source, &mut destination)
            .unwrap_err();

        assert!(matches!(err, ConvertError::DuplicateWrite(key) if key == "b.weight"));
    }

    #[test]
    fn injection_into_a_copied_field_is_a_duplicate_write() {
        let profile = crate::ArchitectureProfile::new("overlap", Framework::Gluon, Framework::Gluon)
            .with_source_rule(
                FilterStage::StructuralPrefix,
                FilterAction::Drop,
                KeyMatcher::prefix("p."),
            )
            .with_source_rule(
                FilterStage::StructuralIndex,
                FilterAction::Auxiliary {
                    role: AuxRole::StructuralIndex,
                },
                KeyMatcher::prefix("q."),
            )
            .with_destination_rule(
                FilterStage::StructuralPrefix,
                FilterAction::Drop,
                KeyMatcher::prefix("b."),
            )
            .with_direct("p.index", "b.index")
            .with_pinned(PinnedAuxiliary::new(
                "q.index".to_string(),
                vec!["b".to_string()],
                "index".to_string(),
                None,
            ));
        let mut registry = ProfileRegistry::empty();
        registry.register(profile).unwrap();
        let plan = registry
            .plan(Framework::Gluon, Framework::Gluon, "net", "net")
            .unwrap();
        let mut source = Network::new(Framework::Gluon, "net");
        source.insert("p.index", filled(1.0, &[2]));
        source.insert("q.index", filled(2.0, &[2]));
        let mut destination = Network::new(Framework::Gluon, "net");
        destination.insert("b.index", filled(0.0, &[2]));

        let session = ConversionSession::prepare(&plan, &source, &destination).unwrap();
        let err = TransferEngine::new(&plan)
            .run(&session, &source, &mut destination)
            .unwrap_err();

        assert!(matches!(err, ConvertError::DuplicateWrite(key) if key == "b.index"));
    }

    #[test]
    fn uncovered_destination_keys_are_reported() {
        let mut plan = ProfileRegistry::builtin()
            .plan(Framework::Gluon, Framework::Gluon, "net", "net")
            .unwrap();
        let mut source = Network::new(Framework::Gluon, "net");
        source.insert("a.weight", filled(1.0, &[2]));
        let mut destination = Network::new(Framework::Gluon, "net");
        destination.insert("a.weight", filled(0.0, &[2]));
        destination.insert("b.weight", filled(0.0, &[2]));
        let session = ConversionSession {
            source_keys: vec!["a.weight".to_string()],
            destination_keys: vec!["a.weight".to_string(), "b.weight".to_string()],
            auxiliary: Vec::new(),
            source_dropped: Vec::new(),
            destination_dropped: Vec::new(),
            source_model: "net".to_string(),
            destination_model: "net".to_string(),
        };

        let err = TransferEngine::new(&plan)
            .run(&session, &source, &mut destination.clone())
            .unwrap_err();
        assert!(matches!(err, ConvertError::Uncovered(keys) if keys == vec!["b.weight"]));

        plan.allow_partial = true;
        let report = TransferEngine::new(&plan)
            .run(&session, &source, &mut destination)
            .unwrap();
        assert_eq!(report.missing, vec!["b.weight"]);
        assert!(!report.is_complete());
    }
}
