//! C9: the Reload Coordinator. Holds the live C3/C4/C5/C6 instances and
//! toggles behind `RwLock`s, applies configuration changes best-effort
//! (§4.9: a reinit failure keeps the previous instance active and only
//! logs), and hands the state machine a consistent `GenerateSnapshot` once
//! per `Generate` entry so an in-flight query is never affected by a
//! reload that lands mid-attempt.

use crate::budgeter::ContextBudgeter;
use nlsql_core::{LlmProvider, NlsqlConfig};
use nlsql_graph::GraphStore;
use nlsql_ontology::OntologyStore;
use nlsql_retrieval::RetrievalStore;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct ReloadCoordinator {
    config: RwLock<NlsqlConfig>,
    llm: Arc<dyn LlmProvider>,

    ontology_enabled: RwLock<bool>,
    ontology_store: RwLock<Arc<OntologyStore>>,

    graph_enabled: RwLock<bool>,
    graph_store: RwLock<Arc<GraphStore>>,

    retrieval_enabled: RwLock<bool>,
    retrieval_store: RwLock<Option<Arc<RetrievalStore>>>,
    retrieval_threshold: RwLock<f32>,
    retrieval_top_k: RwLock<usize>,

    budgeter: RwLock<Arc<ContextBudgeter>>,
}

/// The subsystem view a single `Generate` entry reads once and uses for the
/// whole attempt (§4.9): toggling a subsystem mid-flight never affects a
/// query already past `Generate`.
#[derive(Clone)]
pub struct GenerateSnapshot {
    pub ontology_enabled: bool,
    pub ontology_store: Arc<OntologyStore>,
    pub graph_enabled: bool,
    pub graph_store: Arc<GraphStore>,
    pub retrieval_enabled: bool,
    pub retrieval_store: Option<Arc<RetrievalStore>>,
    pub retrieval_threshold: f32,
    pub retrieval_top_k: usize,
    pub budgeter: Arc<ContextBudgeter>,
}

impl ReloadCoordinator {
    pub fn new(llm: Arc<dyn LlmProvider>, config: NlsqlConfig, retrieval_store: Option<Arc<RetrievalStore>>) -> Self {
        let ontology_store =
            Arc::new(OntologyStore::new(llm.clone()).with_max_concepts(config.ontology.max_concepts as usize));
        let graph_store = Arc::new(GraphStore::new().with_max_join_depth(config.graph.max_join_depth as usize));
        let budgeter = Arc::new(
            ContextBudgeter::new(config.llm.max_context_tokens).maybe_with_strategy_override(config.llm.strategy_override),
        );

        Self {
            ontology_enabled: RwLock::new(config.ontology.enabled),
            graph_enabled: RwLock::new(config.graph.enabled),
            retrieval_enabled: RwLock::new(config.retrieval.enabled),
            retrieval_threshold: RwLock::new(config.retrieval.similarity_threshold),
            retrieval_top_k: RwLock::new(config.retrieval.top_k as usize),
            ontology_store: RwLock::new(ontology_store),
            graph_store: RwLock::new(graph_store),
            retrieval_store: RwLock::new(retrieval_store),
            budgeter: RwLock::new(budgeter),
            config: RwLock::new(config),
            llm,
        }
    }

    pub fn snapshot(&self) -> GenerateSnapshot {
        GenerateSnapshot {
            ontology_enabled: *rl(&self.ontology_enabled),
            ontology_store: rl(&self.ontology_store).clone(),
            graph_enabled: *rl(&self.graph_enabled),
            graph_store: rl(&self.graph_store).clone(),
            retrieval_enabled: *rl(&self.retrieval_enabled),
            retrieval_store: rl(&self.retrieval_store).clone(),
            retrieval_threshold: *rl(&self.retrieval_threshold),
            retrieval_top_k: *rl(&self.retrieval_top_k),
            budgeter: rl(&self.budgeter).clone(),
        }
    }

    pub fn config(&self) -> NlsqlConfig {
        rl(&self.config).clone()
    }

    pub fn set_retrieval_store(&self, store: Option<Arc<RetrievalStore>>) {
        *wl(&self.retrieval_store) = store;
    }

    /// Applies a new configuration in place. Only subsystems whose
    /// generation-relevant knobs actually changed get rebuilt — rebuilding
    /// an `OntologyStore` or `GraphStore` loses its in-memory
    /// cache/graph, so it's only worth it when `max_concepts` /
    /// `max_join_depth` changed (§4.9).
    pub fn apply(&self, new_config: NlsqlConfig) {
        let old = rl(&self.config).clone();

        *wl(&self.ontology_enabled) = new_config.ontology.enabled;
        if new_config.ontology.max_concepts != old.ontology.max_concepts {
            log::info!(
                "rebuilding ontology store: max_concepts {} -> {}",
                old.ontology.max_concepts,
                new_config.ontology.max_concepts
            );
            let fresh =
                Arc::new(OntologyStore::new(self.llm.clone()).with_max_concepts(new_config.ontology.max_concepts as usize));
            *wl(&self.ontology_store) = fresh;
        }

        *wl(&self.graph_enabled) = new_config.graph.enabled;
        if new_config.graph.max_join_depth != old.graph.max_join_depth {
            log::info!(
                "rebuilding graph store: max_join_depth {} -> {}",
                old.graph.max_join_depth,
                new_config.graph.max_join_depth
            );
            let fresh = Arc::new(GraphStore::new().with_max_join_depth(new_config.graph.max_join_depth as usize));
            *wl(&self.graph_store) = fresh;
        }

        *wl(&self.retrieval_enabled) = new_config.retrieval.enabled;
        *wl(&self.retrieval_threshold) = new_config.retrieval.similarity_threshold;
        *wl(&self.retrieval_top_k) = new_config.retrieval.top_k as usize;

        if new_config.llm.max_context_tokens != old.llm.max_context_tokens
            || new_config.llm.strategy_override != old.llm.strategy_override
        {
            log::info!("rebuilding context budgeter: token budget or strategy override changed");
            let fresh = Arc::new(
                ContextBudgeter::new(new_config.llm.max_context_tokens)
                    .maybe_with_strategy_override(new_config.llm.strategy_override),
            );
            *wl(&self.budgeter) = fresh;
        }

        *wl(&self.config) = new_config;
    }
}

fn rl<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn wl<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlsql_test_support::FakeLlmProvider;

    fn coordinator() -> ReloadCoordinator {
        let llm = Arc::new(FakeLlmProvider::new());
        ReloadCoordinator::new(llm, NlsqlConfig::default(), None)
    }

    #[test]
    fn disabling_a_subsystem_does_not_rebuild_its_store() {
        let coordinator = coordinator();
        let before = coordinator.snapshot();

        let mut config = coordinator.config();
        config.ontology.enabled = false;
        coordinator.apply(config);

        let after = coordinator.snapshot();
        assert!(!after.ontology_enabled);
        assert!(Arc::ptr_eq(&before.ontology_store, &after.ontology_store));
    }

    #[test]
    fn changing_max_concepts_rebuilds_the_ontology_store() {
        let coordinator = coordinator();
        let before = coordinator.snapshot();

        let mut config = coordinator.config();
        config.ontology.max_concepts += 5;
        coordinator.apply(config);

        let after = coordinator.snapshot();
        assert!(!Arc::ptr_eq(&before.ontology_store, &after.ontology_store));
    }

    #[test]
    fn changing_token_budget_rebuilds_the_budgeter() {
        let coordinator = coordinator();
        let before = coordinator.snapshot();

        let mut config = coordinator.config();
        config.llm.max_context_tokens += 1000;
        coordinator.apply(config);

        let after = coordinator.snapshot();
        assert!(!Arc::ptr_eq(&before.budgeter, &after.budgeter));
    }
}
