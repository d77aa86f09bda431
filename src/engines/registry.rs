use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{LyricError, LyricResult};
use crate::models::EngineId;
use crate::ports::lyric_engine::LyricEngine;

/// The set of lyric engines available to the application, in registration
/// order.
#[derive(Default, Clone)]
pub struct EngineRegistry {
    order: Vec<EngineId>,
    engines: HashMap<EngineId, Arc<dyn LyricEngine>>,
}

/// Engines selected for a request, plus the requested ids nobody answers to.
pub struct ResolvedEngines {
    pub engines: Vec<Arc<dyn LyricEngine>>,
    pub unknown: Vec<EngineId>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, engine: Arc<dyn LyricEngine>) -> LyricResult<()> {
        let id = engine.id();
        if self.engines.contains_key(&id) {
            return Err(LyricError::DuplicateEngine(id));
        }
        log::debug!("Registering lyric engine `{}` ({})", id, engine.display_name());
        self.order.push(id.clone());
        self.engines.insert(id, engine);
        Ok(())
    }

    pub fn get(&self, id: &EngineId) -> Option<Arc<dyn LyricEngine>> {
        self.engines.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<EngineId> {
        self.order.clone()
    }

    pub fn all(&self) -> Vec<Arc<dyn LyricEngine>> {
        self.order
            .iter()
            .filter_map(|id| self.engines.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Picks the engines for `ids`, dropping duplicates. An empty request
    /// selects every registered engine.
    pub fn resolve(&self, ids: &[EngineId]) -> ResolvedEngines {
        if ids.is_empty() {
            return ResolvedEngines {
                engines: self.all(),
                unknown: Vec::new(),
            };
        }

        let mut engines: Vec<Arc<dyn LyricEngine>> = Vec::new();
        let mut seen: Vec<&EngineId> = Vec::new();
        let mut unknown = Vec::new();
        for id in ids {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            match self.engines.get(id) {
                Some(engine) => engines.push(engine.clone()),
                None => unknown.push(id.clone()),
            }
        }
        ResolvedEngines { engines, unknown }
    }
}
