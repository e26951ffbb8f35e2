//! Session-owned registry for shared (singleton) data sources
//!
//! A `Shared` data source is materialized once per scope and every test in
//! that scope sees the same rows. Scopes are explicit maps owned by the run
//! session, never ambient static state, so multiple sessions cannot
//! cross-contaminate. `clear` is called when the session ends.

use dashmap::DashMap;
use lattice_core::{ArgValue, Result, RowFactory, SharedScope};
use tracing::debug;

type Rows = Vec<Vec<ArgValue>>;

/// Scoped singleton storage for shared data sources
#[derive(Default)]
pub struct SharedSourceRegistry {
    global: DashMap<String, Rows>,
    per_class: DashMap<(String, String), Rows>,
    keyed: DashMap<String, Rows>,
}

impl SharedSourceRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a shared source to its singleton rows, materializing via
    /// `produce` on first access within the scope
    ///
    /// The returned factories replay the cached values; a shared source is
    /// intentionally *not* re-sampled per repetition.
    pub fn resolve(
        &self,
        scope: &SharedScope,
        class: &str,
        source_name: &str,
        produce: impl FnOnce() -> Result<Rows>,
    ) -> Result<Vec<RowFactory>> {
        let rows = match scope {
            SharedScope::Global => {
                self.lookup_or_insert(&self.global, source_name.to_string(), produce)?
            }
            SharedScope::PerClass => self.lookup_or_insert(
                &self.per_class,
                (class.to_string(), source_name.to_string()),
                produce,
            )?,
            SharedScope::Key(key) => self.lookup_or_insert(&self.keyed, key.clone(), produce)?,
        };
        Ok(rows.into_iter().map(RowFactory::literal).collect())
    }

    fn lookup_or_insert<K: std::hash::Hash + Eq + Clone>(
        &self,
        map: &DashMap<K, Rows>,
        key: K,
        produce: impl FnOnce() -> Result<Rows>,
    ) -> Result<Rows> {
        if let Some(cached) = map.get(&key) {
            return Ok(cached.value().clone());
        }
        let rows = produce()?;
        Ok(map.entry(key).or_insert(rows).value().clone())
    }

    /// Drop every cached materialization; called at session end
    pub fn clear(&self) {
        debug!(
            global = self.global.len(),
            per_class = self.per_class.len(),
            keyed = self.keyed.len(),
            "clearing shared source registry"
        );
        self.global.clear();
        self.per_class.clear();
        self.keyed.clear();
    }
}
