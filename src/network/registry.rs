//! Interception rule registry.
//!
//! Maps remote-assigned intercept ids to their phase and ordered handler
//! list. Entries are only ever created through
//! [`InterceptRegistry::get_or_create`]; every read path leaves the table
//! untouched.
//!
//! The registry is plain data. [`Network`](super::Network) shares it behind
//! a `parking_lot::Mutex` that is held only for one read or mutate step.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Error, Result};
use crate::identifiers::InterceptId;
use crate::protocol::InterceptPhase;

use super::pipeline::Handler;

// ============================================================================
// InterceptRule
// ============================================================================

/// One remote intercept and its local handlers.
pub struct InterceptRule {
    /// Phase the intercept pauses.
    pub phase: InterceptPhase,

    /// Handlers in registration order.
    handlers: Vec<Handler>,
}

impl InterceptRule {
    fn new(phase: InterceptPhase) -> Self {
        Self {
            phase,
            handlers: Vec::new(),
        }
    }

    /// Returns the number of handlers.
    #[inline]
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Appends a handler.
    #[inline]
    pub fn push(&mut self, handler: Handler) {
        self.handlers.push(handler);
    }
}

impl std::fmt::Debug for InterceptRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptRule")
            .field("phase", &self.phase)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

// ============================================================================
// InterceptRegistry
// ============================================================================

/// Table of live intercept rules.
#[derive(Debug, Default)]
pub struct InterceptRegistry {
    rules: FxHashMap<InterceptId, InterceptRule>,
    /// Ids in registration order.
    order: Vec<InterceptId>,
}

impl InterceptRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the rule for `id`, creating an empty one if absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `id` already belongs to another
    /// phase.
    pub fn get_or_create(
        &mut self,
        id: InterceptId,
        phase: InterceptPhase,
    ) -> Result<&mut InterceptRule> {
        if !self.rules.contains_key(&id) {
            self.order.push(id.clone());
        }

        let rule = self
            .rules
            .entry(id.clone())
            .or_insert_with(|| InterceptRule::new(phase));

        if rule.phase != phase {
            return Err(Error::invalid_argument(format!(
                "intercept {id} is registered for {}, not {phase}",
                rule.phase
            )));
        }

        Ok(rule)
    }

    /// Stores a new rule with one handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `id` is already registered.
    pub fn insert(&mut self, id: InterceptId, phase: InterceptPhase, handler: Handler) -> Result<()> {
        if self.contains(&id) {
            return Err(Error::invalid_argument(format!(
                "intercept {id} is already registered"
            )));
        }
        self.get_or_create(id, phase)?.push(handler);
        Ok(())
    }

    /// Appends a handler to an existing rule, returning its new handler
    /// count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InterceptNotFound`] if `id` is unknown.
    pub fn append_handler(&mut self, id: &InterceptId, handler: Handler) -> Result<usize> {
        let rule = self
            .rules
            .get_mut(id)
            .ok_or_else(|| Error::intercept_not_found(id.clone()))?;
        rule.push(handler);
        Ok(rule.handler_count())
    }

    /// Removes a rule, returning it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InterceptNotFound`] if `id` is unknown; the table is
    /// left unchanged.
    pub fn remove(&mut self, id: &InterceptId) -> Result<InterceptRule> {
        let rule = self
            .rules
            .remove(id)
            .ok_or_else(|| Error::intercept_not_found(id.clone()))?;
        self.order.retain(|existing| existing != id);
        Ok(rule)
    }

    /// Returns the phase of `id`.
    #[inline]
    #[must_use]
    pub fn phase_of(&self, id: &InterceptId) -> Option<InterceptPhase> {
        self.rules.get(id).map(|rule| rule.phase)
    }

    /// Returns `true` if `id` is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &InterceptId) -> bool {
        self.rules.contains_key(id)
    }

    /// Returns the number of rules.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if no rules are registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Snapshot of every id, in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<InterceptId> {
        self.order.clone()
    }

    /// Returns how many rules pause `phase`.
    #[must_use]
    pub fn phase_count(&self, phase: InterceptPhase) -> usize {
        self.rules.values().filter(|rule| rule.phase == phase).count()
    }

    /// Returns every phase with at least one rule, in lifecycle order.
    #[must_use]
    pub fn phases(&self) -> Vec<InterceptPhase> {
        InterceptPhase::ALL
            .into_iter()
            .filter(|phase| self.rules.values().any(|rule| rule.phase == *phase))
            .collect()
    }

    /// Returns the handlers that apply to an event blocked by `ids`.
    ///
    /// Handlers are concatenated in `ids` order, then registration order.
    /// Unknown and repeated ids are skipped.
    #[must_use]
    pub fn handlers_for(&self, ids: &[InterceptId]) -> Vec<Handler> {
        let mut seen = FxHashSet::default();

        ids.iter()
            .filter(|id| seen.insert(*id))
            .filter_map(|id| self.rules.get(id))
            .flat_map(|rule| rule.handlers.iter().cloned())
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
