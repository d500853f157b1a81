use crate::filter::{AuxiliarySet, DroppedKey, KeyFilter};
use crate::normalize::RewriteTable;
use crate::profile::AuxRole;
use crate::registry::ConversionPlan;
use crate::{ConvertError, Network};

/// State of one conversion: the aligned key sequences and the side channels.
///
/// Built from the flat views of both networks; neither network is modified.
#[derive(Debug, Clone)]
pub struct ConversionSession {
    /// Ordered source keys of the positional walk.
    pub source_keys: Vec<String>,
    /// Ordered destination keys of the positional walk.
    pub destination_keys: Vec<String>,
    /// Source keys routed by role, each set in the walk's order.
    pub auxiliary: Vec<AuxiliarySet>,
    /// Source keys left out.
    pub source_dropped: Vec<DroppedKey>,
    /// Destination keys left out.
    pub destination_dropped: Vec<DroppedKey>,
    /// Source architecture.
    pub source_model: String,
    /// Destination architecture.
    pub destination_model: String,
}

impl ConversionSession {
    /// Filter, count-check and order the keys of both networks.
    pub fn prepare(
        plan: &ConversionPlan,
        source: &Network,
        destination: &Network,
    ) -> Result<Self, ConvertError> {
        let source_filtered = KeyFilter::new(&plan.source_filter)?.apply(&source.named_keys());
        let destination_filtered =
            KeyFilter::new(&plan.destination_filter)?.apply(&destination.named_keys());

        let source_count = source_filtered.retained.len();
        let destination_count = destination_filtered.retained.len();
        let aligned = if plan.allow_partial {
            source_count <= destination_count
        } else {
            source_count == destination_count
        };
        if !aligned {
            return Err(ConvertError::ParameterCountMismatch {
                source_count,
                destination_count,
            });
        }

        let source_table = RewriteTable::new(plan.source_rewrites.clone());
        let destination_table = RewriteTable::new(plan.destination_rewrites.clone());
        let source_keys = source_table.order(source_filtered.retained, plan.order)?;
        let destination_keys = destination_table.order(destination_filtered.retained, plan.order)?;

        let auxiliary = source_filtered
            .auxiliary
            .into_iter()
            .map(|set| {
                Ok(AuxiliarySet {
                    role: set.role,
                    keys: source_table.order(set.keys, plan.order)?,
                })
            })
            .collect::<Result<Vec<_>, ConvertError>>()?;

        log::info!(
            "Aligned {source_count} source keys with {destination_count} destination keys \
             ({} auxiliary, {} dropped)",
            auxiliary.iter().map(|set| set.keys.len()).sum::<usize>(),
            source_filtered.dropped.len() + destination_filtered.dropped.len(),
        );

        Ok(Self {
            source_keys,
            destination_keys,
            auxiliary,
            source_dropped: source_filtered.dropped,
            destination_dropped: destination_filtered.dropped,
            source_model: plan.source_model.clone(),
            destination_model: plan.destination_model.clone(),
        })
    }

    /// Aligned pairs of the positional walk.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.source_keys
            .iter()
            .zip(self.destination_keys.iter())
            .map(|(source, destination)| (source.as_str(), destination.as_str()))
    }

    /// Source keys routed to `role`.
    pub fn auxiliary(&self, role: AuxRole) -> &[String] {
        self.auxiliary
            .iter()
            .find(|set| set.role == role)
            .map(|set| set.keys.as_slice())
            .unwrap_or_default()
    }
}
