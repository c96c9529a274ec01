use std::sync::Arc;

use tracing::info;

use super::{ApplicationStrategy, AttemptOutcome, Availability, StrategyDescriptor, StrategyRegistry};

/// A strategy chosen to run next.
pub struct Selected {
    pub descriptor: StrategyDescriptor,
    pub strategy: Arc<dyn ApplicationStrategy>,
}

/// Outcome of one pure selection pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Selection {
    /// Index into the slice that was searched.
    pub chosen: Option<usize>,
    /// Strategies passed over, with their reasons.
    pub skipped: Vec<(String, String)>,
}

/// Picks the first available strategy in `remaining`.
///
/// Depends only on the slice and on what `availability` reports for each entry.
pub fn select_next<F>(remaining: &[StrategyDescriptor], mut availability: F) -> Selection
where
    F: FnMut(&StrategyDescriptor) -> Availability,
{
    let mut selection = Selection::default();
    for (i, descriptor) in remaining.iter().enumerate() {
        match availability(descriptor) {
            Availability::Available => {
                selection.chosen = Some(i);
                break;
            }
            Availability::Unavailable(reason) => {
                selection.skipped.push((descriptor.name.clone(), reason));
            }
        }
    }
    selection
}

/// Whether the chain should try another strategy after this outcome.
pub fn should_continue(outcome: &AttemptOutcome) -> bool {
    matches!(outcome, AttemptOutcome::RecoverableFailure { .. })
}

/// Walks a priority-ordered chain once. A strategy is never offered twice.
pub struct StrategySelector {
    chain: Vec<StrategyDescriptor>,
    position: usize,
}

impl StrategySelector {
    pub fn new(mut chain: Vec<StrategyDescriptor>) -> Self {
        chain.sort_by_key(|d| d.priority);
        Self { chain, position: 0 }
    }

    pub fn next(&mut self, registry: &StrategyRegistry, ats_type: &str) -> Option<Selected> {
        let remaining = &self.chain[self.position.min(self.chain.len())..];
        let selection = select_next(remaining, |descriptor| match registry.get(&descriptor.name) {
            Some(strategy) => strategy.availability(ats_type),
            None => Availability::Unavailable("not registered".to_string()),
        });

        for (name, reason) in &selection.skipped {
            info!("Skipping strategy {name}: {reason}");
        }

        match selection.chosen {
            Some(offset) => {
                let descriptor = remaining[offset].clone();
                self.position += offset + 1;
                let strategy = registry.get(&descriptor.name)?;
                Some(Selected {
                    descriptor,
                    strategy,
                })
            }
            None => {
                self.position = self.chain.len();
                None
            }
        }
    }

    pub fn remaining(&self) -> &[StrategyDescriptor] {
        &self.chain[self.position.min(self.chain.len())..]
    }
}
