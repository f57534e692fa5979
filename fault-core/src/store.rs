//! Hot-swappable holder of the active rule set

use crate::rules::CompiledRuleSet;
use arc_swap::ArcSwap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Holds the single live [`CompiledRuleSet`].
///
/// Readers take a snapshot with [`RuleStore::current`] and keep it for the
/// whole match; a concurrent [`RuleStore::publish`] swaps the pointer without
/// touching any snapshot already handed out.
#[derive(Debug)]
pub struct RuleStore {
    active: ArcSwap<CompiledRuleSet>,
    /// Version of the active set, for observers that want to react to reloads
    version_tx: watch::Sender<String>,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleStore {
    /// A store whose active set is empty, so every request passes through.
    pub fn new() -> Self {
        let (version_tx, _) = watch::channel(String::new());
        Self {
            active: ArcSwap::from_pointee(CompiledRuleSet::empty()),
            version_tx,
        }
    }

    /// Replace the active rule set in one atomic swap.
    pub fn publish(&self, rule_set: CompiledRuleSet) -> Arc<CompiledRuleSet> {
        let version = rule_set.version().to_string();
        let rules = rule_set.len();
        let previous = self.active.swap(Arc::new(rule_set));
        info!(
            version = %version,
            previous_version = %previous.version(),
            rules,
            "Published rule set"
        );
        self.version_tx.send_replace(version);
        previous
    }

    /// Snapshot of whichever set is active right now.
    pub fn current(&self) -> Arc<CompiledRuleSet> {
        self.active.load_full()
    }

    pub fn version(&self) -> String {
        self.active.load().version().to_string()
    }

    /// Receive the version string of every published set.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.version_tx.subscribe()
    }
}
