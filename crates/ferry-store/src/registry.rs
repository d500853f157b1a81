use crate::profile::{
    ArchitectureProfile, AuxRole, AuxiliaryRule, DirectMapping, FilterAction, FilterRule,
    FilterStage, KeyMatcher, KeyOrder, PinnedAuxiliary, Rewrite, SqueezeException,
};
use crate::{ConvertError, DType, Framework};

/// Everything needed to convert one architecture between two representations.
///
/// Merged from every profile that applies, in registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionPlan {
    /// Source representation.
    pub source_framework: Framework,
    /// Destination representation.
    pub destination_framework: Framework,
    /// Source architecture.
    pub source_model: String,
    /// Destination architecture.
    pub destination_model: String,
    /// Names of the merged profiles.
    pub profiles: Vec<String>,
    /// Rules applied to the source keys.
    pub source_filter: Vec<FilterRule>,
    /// Rules applied to the destination keys.
    pub destination_filter: Vec<FilterRule>,
    /// Rewrites folding source keys.
    pub source_rewrites: Vec<Rewrite>,
    /// Rewrites folding destination keys.
    pub destination_rewrites: Vec<Rewrite>,
    /// Ordering of the retained keys.
    pub order: KeyOrder,
    /// Pairs transferred by name.
    pub direct: Vec<DirectMapping>,
    /// Auxiliary keys with fixed destinations.
    pub pinned: Vec<PinnedAuxiliary>,
    /// Resolution rules for auxiliary keys.
    pub auxiliary: Vec<AuxiliaryRule>,
    /// Named squeeze exceptions.
    pub squeeze: Vec<SqueezeException>,
    /// Allow fewer source keys than destination keys.
    pub allow_partial: bool,
    /// Require matching leaf tokens for every aligned pair.
    pub check_roles: bool,
}

impl ConversionPlan {
    fn empty(
        source: Framework,
        destination: Framework,
        source_model: &str,
        destination_model: &str,
    ) -> Self {
        Self {
            source_framework: source,
            destination_framework: destination,
            source_model: source_model.to_string(),
            destination_model: destination_model.to_string(),
            profiles: Vec::new(),
            source_filter: Vec::new(),
            destination_filter: Vec::new(),
            source_rewrites: Vec::new(),
            destination_rewrites: Vec::new(),
            order: KeyOrder::Native,
            direct: Vec::new(),
            pinned: Vec::new(),
            auxiliary: Vec::new(),
            squeeze: Vec::new(),
            allow_partial: false,
            check_roles: false,
        }
    }

    fn merge(&mut self, profile: &ArchitectureProfile) {
        self.profiles.push(profile.name.clone());
        self.source_filter.extend(profile.source_filter.iter().cloned());
        self.destination_filter
            .extend(profile.destination_filter.iter().cloned());
        self.source_rewrites
            .extend(profile.source_rewrites.iter().cloned());
        self.destination_rewrites
            .extend(profile.destination_rewrites.iter().cloned());
        if let Some(order) = profile.order {
            self.order = order;
        }
        self.direct.extend(profile.direct.iter().cloned());
        self.pinned.extend(profile.pinned.iter().cloned());
        self.auxiliary.extend(profile.auxiliary.iter().cloned());
        self.squeeze.extend(profile.squeeze.iter().cloned());
        self.allow_partial |= profile.allow_partial;
        self.check_roles |= profile.check_roles;
    }

    /// Squeeze count registered for a source key.
    pub fn squeeze_count(&self, source_key: &str) -> Option<usize> {
        self.squeeze
            .iter()
            .find(|squeeze| squeeze.source_key == source_key)
            .map(|squeeze| squeeze.count)
    }
}

/// The set of known profiles.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: Vec<ArchitectureProfile>,
}

impl ProfileRegistry {
    /// A registry without any profile.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding the built-in profiles.
    pub fn builtin() -> Self {
        Self {
            profiles: builtin_profiles(),
        }
    }

    /// Register a profile after validating it.
    pub fn register(&mut self, profile: ArchitectureProfile) -> Result<(), ConvertError> {
        profile.validate()?;
        log::debug!(
            "Registered profile {} ({} -> {})",
            profile.name,
            profile.source_framework,
            profile.destination_framework
        );
        self.profiles.push(profile);
        Ok(())
    }

    /// Register several profiles.
    pub fn extend<I: IntoIterator<Item = ArchitectureProfile>>(
        &mut self,
        profiles: I,
    ) -> Result<(), ConvertError> {
        for profile in profiles {
            self.register(profile)?;
        }
        Ok(())
    }

    /// Registered profiles, in registration order.
    pub fn profiles(&self) -> &[ArchitectureProfile] {
        &self.profiles
    }

    /// Whether a framework-pair profile exists for this pair.
    pub fn supports(&self, source: Framework, destination: Framework) -> bool {
        self.profiles.iter().any(|profile| {
            profile.is_pair_profile()
                && profile.source_framework == source
                && profile.destination_framework == destination
        })
    }

    /// Merge every profile that applies to the conversion.
    pub fn plan(
        &self,
        source: Framework,
        destination: Framework,
        source_model: &str,
        destination_model: &str,
    ) -> Result<ConversionPlan, ConvertError> {
        if !self.supports(source, destination) {
            return Err(ConvertError::UnsupportedConversion {
                from: source,
                to: destination,
            });
        }

        let mut plan = ConversionPlan::empty(source, destination, source_model, destination_model);
        for profile in self.profiles.iter().filter(|profile| {
            profile.applies_to(source, destination, source_model, destination_model)
        }) {
            plan.merge(profile);
        }

        log::info!(
            "Planned {source}-model {source_model} -> {destination}-model {destination_model} \
             with profiles {:?}",
            plan.profiles
        );
        Ok(plan)
    }
}

const RESNET_V1_BOTTLENECK: [&str; 3] = ["resnet50_v1", "resnet101_v1", "resnet152_v1"];
const RESNET_V2: [&str; 5] = [
    "resnet18_v2",
    "resnet34_v2",
    "resnet50_v2",
    "resnet101_v2",
    "resnet152_v2",
];
const CONDENSENET: [&str; 2] = ["condensenet74_c4_g4", "condensenet74_c8_g8"];

/// Gluon source quirks, shared by every gluon source pair.
fn gluon_source_profiles(destination: Framework) -> Vec<ArchitectureProfile> {
    vec![
        ArchitectureProfile::new(
            format!("gluon-{destination}-resnet-v1-bias"),
            Framework::Gluon,
            destination,
        )
        .with_source_models(&RESNET_V1_BOTTLENECK)
        .with_source_rule(
            FilterStage::BiasConvention,
            FilterAction::Drop,
            KeyMatcher::prefix_suffix("features.", ".bias"),
        ),
        ArchitectureProfile::new(
            format!("gluon-{destination}-resnet-v2-stem"),
            Framework::Gluon,
            destination,
        )
        .with_source_models(&RESNET_V2)
        .with_source_rule(
            FilterStage::StructuralPrefix,
            FilterAction::Drop,
            KeyMatcher::Leading { count: 4 },
        ),
    ]
}

fn running_stat_rule(role: AuxRole, field: &str) -> AuxiliaryRule {
    AuxiliaryRule {
        role,
        source_anchor: ".beta".to_string(),
        source_strip: 1,
        destination_anchor: "/beta".to_string(),
        destination_strip: 1,
        field: field.to_string(),
        dtype: None,
    }
}

fn builtin_profiles() -> Vec<ArchitectureProfile> {
    let mut profiles = Vec::new();

    profiles.push(
        ArchitectureProfile::new("gluon-gluon", Framework::Gluon, Framework::Gluon)
            .with_role_check(),
    );
    profiles.extend(gluon_source_profiles(Framework::Gluon));

    profiles.push(
        ArchitectureProfile::new("gluon-pytorch", Framework::Gluon, Framework::PyTorch)
            .with_destination_rule(
                FilterStage::Bookkeeping,
                FilterAction::Drop,
                KeyMatcher::suffix("num_batches_tracked"),
            ),
    );
    profiles.extend(gluon_source_profiles(Framework::PyTorch));

    profiles.push(
        ArchitectureProfile::new("pytorch-gluon", Framework::PyTorch, Framework::Gluon)
            .with_source_rule(
                FilterStage::Bookkeeping,
                FilterAction::Drop,
                KeyMatcher::suffix("num_batches_tracked"),
            ),
    );

    profiles.push(
        ArchitectureProfile::new("pytorch-pytorch", Framework::PyTorch, Framework::PyTorch)
            .with_role_check(),
    );

    for destination in [Framework::PyTorch, Framework::Gluon] {
        profiles.push(
            ArchitectureProfile::new(
                format!("pytorch-{destination}-oth-shufflenetv2"),
                Framework::PyTorch,
                destination,
            )
            .with_source_models(&["oth_shufflenetv2_wd2"])
            .with_source_rule(
                FilterStage::StructuralPrefix,
                FilterAction::Drop,
                KeyMatcher::prefix("network.0."),
            ),
        );
    }
    profiles.push(
        ArchitectureProfile::new(
            "pytorch-pytorch-shufflenetv2-head",
            Framework::PyTorch,
            Framework::PyTorch,
        )
        .with_source_models(&["oth_shufflenetv2_wd2"])
        .with_destination_models(&["shufflenetv2_wd2"])
        .with_squeeze("network.8.weight", 2),
    );

    profiles.push(
        ArchitectureProfile::new("gluon-chainer", Framework::Gluon, Framework::Chainer)
            .with_source_rule(
                FilterStage::RunningStatistics,
                FilterAction::Auxiliary {
                    role: AuxRole::RunningMean,
                },
                KeyMatcher::suffix(".running_mean"),
            )
            .with_source_rule(
                FilterStage::RunningStatistics,
                FilterAction::Auxiliary {
                    role: AuxRole::RunningVar,
                },
                KeyMatcher::suffix(".running_var"),
            )
            .with_destination_rewrite("/W", "/weight")
            .with_destination_rewrite("/post_activ/", "/stageN/post_activ/")
            .with_destination_rewrite("/final_block/", "/stageN/final_block/")
            .with_destination_rewrite("/stem1_unit/", "/stage0/stem1_unit/")
            .with_destination_rewrite("/stem2_unit/", "/stage0/stem2_unit/")
            .with_order(KeyOrder::Natural)
            .with_auxiliary(running_stat_rule(AuxRole::RunningMean, "avg_mean"))
            .with_auxiliary(running_stat_rule(AuxRole::RunningVar, "avg_var")),
    );
    profiles.extend(gluon_source_profiles(Framework::Chainer));
    profiles.push(
        ArchitectureProfile::new("gluon-chainer-condensenet", Framework::Gluon, Framework::Chainer)
            .with_source_models(&CONDENSENET)
            .with_source_rule(
                FilterStage::StructuralIndex,
                FilterAction::Auxiliary {
                    role: AuxRole::StructuralIndex,
                },
                KeyMatcher::suffix(".index"),
            )
            .with_pinned(PinnedAuxiliary::new(
                "output.1.index".to_string(),
                vec!["output".to_string(), "fc".to_string()],
                "index".to_string(),
                Some(DType::I32),
            ))
            .with_auxiliary(AuxiliaryRule {
                role: AuxRole::StructuralIndex,
                source_anchor: ".conv1.conv.weight".to_string(),
                source_strip: 2,
                destination_anchor: "/conv1/conv/W".to_string(),
                destination_strip: 2,
                field: "index".to_string(),
                dtype: Some(DType::I32),
            }),
    );

    profiles.push(ArchitectureProfile::new("mxnet-gluon", Framework::MxNet, Framework::Gluon));
    let mut preresnet = ArchitectureProfile::new(
        "mxnet-gluon-preresnet200b",
        Framework::MxNet,
        Framework::Gluon,
    )
    .with_source_models(&["preresnet200b"])
    .with_source_rule(
        FilterStage::StructuralPrefix,
        FilterAction::Drop,
        KeyMatcher::keep_prefix("stage"),
    )
    .with_destination_rule(
        FilterStage::StructuralPrefix,
        FilterAction::Drop,
        KeyMatcher::keep_prefix("features"),
    )
    .with_destination_rule(
        FilterStage::StructuralPrefix,
        FilterAction::Drop,
        KeyMatcher::prefix("features.0"),
    )
    .with_destination_rule(
        FilterStage::StructuralPrefix,
        FilterAction::Drop,
        KeyMatcher::prefix("features.5"),
    )
    .with_destination_rule(
        FilterStage::RunningStatistics,
        FilterAction::Drop,
        KeyMatcher::suffix("running_mean"),
    )
    .with_destination_rule(
        FilterStage::RunningStatistics,
        FilterAction::Drop,
        KeyMatcher::suffix("running_var"),
    )
    .with_direct("conv0_weight", "features.0.conv.weight")
    .with_direct("bn0_beta", "features.0.bn.beta")
    .with_direct("bn0_gamma", "features.0.bn.gamma")
    .with_direct("bn1_beta", "features.5.bn.beta")
    .with_direct("bn1_gamma", "features.5.bn.gamma")
    .with_direct("fc1_bias", "output.1.bias")
    .with_direct("fc1_weight", "output.1.weight")
    .with_order(KeyOrder::Natural)
    .with_partial();
    for n in 1..=3 {
        preresnet =
            preresnet.with_source_rewrite(format!("_conv{n}_"), format!(".conv{n}.conv."));
    }
    for n in 1..=3 {
        preresnet = preresnet.with_source_rewrite(format!("_bn{n}_"), format!(".conv{n}.bn."));
    }
    profiles.push(preresnet);

    profiles
}
