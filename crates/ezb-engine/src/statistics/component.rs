//! Statistic component
//!
//! Owns the factory and provider trees and one statistic per pair of a
//! value-producing factory and a provider. A statistic in AUTO mode is
//! active exactly when both its factory and its provider are effectively
//! enabled; MANUAL statistics keep their own state. Values are measured from
//! the last activation or reset.
//!
//! One lock guards the whole component; every operation takes it once.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::tree::{HierarchyTree, NodeMode, ParentRule, StatisticError};
use crate::container::components::{Component, ComponentError};

/// Root of the built-in factories
pub const FACTORY_EJB: &str = "ejb";
/// Business call statistics
pub const FACTORY_CALL: &str = "ejb.call";
/// Number of calls
pub const FACTORY_CALL_COUNT: &str = "ejb.call.count";
/// Number of failed calls
pub const FACTORY_CALL_ERRORS: &str = "ejb.call.errors";
/// Average call duration in microseconds
pub const FACTORY_CALL_DURATION: &str = "ejb.call.duration";

/// What a factory measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticKind {
    /// Calls
    CallCount,
    /// Failed calls
    ErrorCount,
    /// Average duration
    AverageDuration,
}

/// State of a single statistic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatisticMode {
    /// Follows factory and provider
    #[default]
    Auto,
    /// Fixed state
    Manual(bool),
}

/// Measured value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticValue {
    /// A counter
    Count(u64),
    /// Average in microseconds over `samples`
    Average {
        /// Sum of samples in microseconds
        total_micros: u64,
        /// Number of samples
        samples: u64,
    },
}

impl StatisticValue {
    fn zero(kind: StatisticKind) -> Self {
        match kind {
            StatisticKind::CallCount | StatisticKind::ErrorCount => StatisticValue::Count(0),
            StatisticKind::AverageDuration => StatisticValue::Average {
                total_micros: 0,
                samples: 0,
            },
        }
    }

    /// Counter value, or the average for durations
    pub fn as_u64(&self) -> u64 {
        match *self {
            StatisticValue::Count(n) => n,
            StatisticValue::Average {
                total_micros,
                samples,
            } => total_micros.checked_div(samples).unwrap_or(0),
        }
    }
}

/// Read-only view of a statistic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticSnapshot {
    /// Factory id
    pub factory: String,
    /// Provider id
    pub provider: String,
    /// Mode
    pub mode: StatisticMode,
    /// Whether values are being recorded
    pub active: bool,
    /// Current value
    pub value: StatisticValue,
    /// Time since activation or reset (zero when inactive)
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
struct Statistic {
    kind: StatisticKind,
    mode: StatisticMode,
    active: bool,
    value: StatisticValue,
    since: Instant,
}

impl Statistic {
    fn set_active(&mut self, active: bool) {
        if active && !self.active {
            self.value = StatisticValue::zero(self.kind);
            self.since = Instant::now();
        }
        self.active = active;
    }

    fn record(&mut self, elapsed: Duration, failed: bool) {
        if !self.active {
            return;
        }
        match (&mut self.value, self.kind) {
            (StatisticValue::Count(n), StatisticKind::CallCount) => *n += 1,
            (StatisticValue::Count(n), StatisticKind::ErrorCount) if failed => *n += 1,
            (
                StatisticValue::Average {
                    total_micros,
                    samples,
                },
                StatisticKind::AverageDuration,
            ) => {
                *total_micros = total_micros.saturating_add(elapsed.as_micros() as u64);
                *samples += 1;
            }
            _ => {}
        }
    }
}

struct Inner {
    factories: HierarchyTree,
    providers: HierarchyTree,
    kinds: BTreeMap<String, StatisticKind>,
    statistics: BTreeMap<(String, String), Statistic>,
    running: bool,
}

impl Inner {
    fn auto_state(&self, factory: &str, provider: &str) -> bool {
        self.factories.effective(factory).unwrap_or(false)
            && self.providers.effective(provider).unwrap_or(false)
    }

    fn refresh_factories(&mut self, ids: &[String]) {
        let keys: Vec<(String, String)> = self
            .statistics
            .keys()
            .filter(|(f, _)| ids.contains(f))
            .cloned()
            .collect();
        self.refresh(keys);
    }

    fn refresh_providers(&mut self, ids: &[String]) {
        let keys: Vec<(String, String)> = self
            .statistics
            .keys()
            .filter(|(_, p)| ids.contains(p))
            .cloned()
            .collect();
        self.refresh(keys);
    }

    fn refresh(&mut self, keys: Vec<(String, String)>) {
        for (factory, provider) in keys {
            let state = self.auto_state(&factory, &provider);
            if let Some(stat) = self.statistics.get_mut(&(factory, provider)) {
                if stat.mode == StatisticMode::Auto {
                    stat.set_active(state);
                }
            }
        }
    }

    fn create_statistic(&mut self, factory: &str, kind: StatisticKind, provider: &str) {
        let active = self.auto_state(factory, provider);
        self.statistics.insert(
            (factory.to_string(), provider.to_string()),
            Statistic {
                kind,
                mode: StatisticMode::Auto,
                active,
                value: StatisticValue::zero(kind),
                since: Instant::now(),
            },
        );
    }
}

/// The statistics component of an embedded server
pub struct StatisticComponent {
    inner: Mutex<Inner>,
}

impl StatisticComponent {
    /// Create a component with the built-in factories
    pub fn new(default_enabled: bool) -> Self {
        let component = Self {
            inner: Mutex::new(Inner {
                factories: HierarchyTree::new("factory", ParentRule::DotSuffix, default_enabled),
                providers: HierarchyTree::new("provider", ParentRule::SlashPrefix, true),
                kinds: BTreeMap::new(),
                statistics: BTreeMap::new(),
                running: false,
            }),
        };
        let builtin = [
            (FACTORY_EJB, None),
            (FACTORY_CALL, None),
            (FACTORY_CALL_COUNT, Some(StatisticKind::CallCount)),
            (FACTORY_CALL_ERRORS, Some(StatisticKind::ErrorCount)),
            (FACTORY_CALL_DURATION, Some(StatisticKind::AverageDuration)),
        ];
        for (id, kind) in builtin {
            if let Err(e) = component.register_factory(id, kind) {
                warn!(factory = id, error = %e, "Cannot register built-in statistic factory");
            }
        }
        component
    }

    /// Register a statistic factory; `kind` is set for value-producing ones
    pub fn register_factory(&self, id: &str, kind: Option<StatisticKind>) -> Result<(), StatisticError> {
        let mut inner = self.inner.lock();
        let updated = inner.factories.add(id, NodeMode::Inherit)?;
        if let Some(kind) = kind {
            inner.kinds.insert(id.to_string(), kind);
            let providers: Vec<String> = inner.providers.ids().map(str::to_string).collect();
            for provider in providers {
                inner.create_statistic(id, kind, &provider);
            }
        }
        inner.refresh_factories(&updated);
        debug!(factory = id, "Registered statistic factory");
        Ok(())
    }

    /// Unregister a factory and drop its statistics
    pub fn unregister_factory(&self, id: &str) -> Result<(), StatisticError> {
        let mut inner = self.inner.lock();
        let updated = inner.factories.remove(id)?;
        inner.kinds.remove(id);
        inner.statistics.retain(|(f, _), _| f != id);
        inner.refresh_factories(&updated);
        Ok(())
    }

    /// Register a provider and create its statistics
    pub fn register_provider(&self, id: &str) -> Result<(), StatisticError> {
        let mut inner = self.inner.lock();
        let updated = inner.providers.add(id, NodeMode::Inherit)?;
        let kinds: Vec<(String, StatisticKind)> =
            inner.kinds.iter().map(|(f, k)| (f.clone(), *k)).collect();
        for (factory, kind) in kinds {
            inner.create_statistic(&factory, kind, id);
        }
        inner.refresh_providers(&updated);
        debug!(provider = id, "Registered statistic provider");
        Ok(())
    }

    /// Unregister a provider and drop its statistics
    pub fn unregister_provider(&self, id: &str) -> Result<(), StatisticError> {
        let mut inner = self.inner.lock();
        let updated = inner.providers.remove(id)?;
        inner.statistics.retain(|(_, p), _| p != id);
        inner.refresh_providers(&updated);
        Ok(())
    }

    /// Change a factory's mode
    pub fn set_factory_mode(&self, id: &str, mode: NodeMode) -> Result<(), StatisticError> {
        let mut inner = self.inner.lock();
        let updated = inner.factories.set_mode(id, mode)?;
        inner.refresh_factories(&updated);
        Ok(())
    }

    /// Change a provider's mode
    pub fn set_provider_mode(&self, id: &str, mode: NodeMode) -> Result<(), StatisticError> {
        let mut inner = self.inner.lock();
        let updated = inner.providers.set_mode(id, mode)?;
        inner.refresh_providers(&updated);
        Ok(())
    }

    /// Change the state every root factory inherits
    pub fn set_factories_enabled(&self, enabled: bool) {
        let mut inner = self.inner.lock();
        let updated = inner.factories.set_root_enabled(enabled);
        inner.refresh_factories(&updated);
    }

    /// Change a statistic's mode
    pub fn set_statistic_mode(
        &self,
        factory: &str,
        provider: &str,
        mode: StatisticMode,
    ) -> Result<(), StatisticError> {
        let mut inner = self.inner.lock();
        let state = match mode {
            StatisticMode::Manual(value) => value,
            StatisticMode::Auto => inner.auto_state(factory, provider),
        };
        let stat = inner
            .statistics
            .get_mut(&(factory.to_string(), provider.to_string()))
            .ok_or_else(|| StatisticError::UnknownStatistic {
                factory: factory.to_string(),
                provider: provider.to_string(),
            })?;
        stat.mode = mode;
        stat.set_active(state);
        Ok(())
    }

    /// Effective state of a factory
    pub fn is_factory_enabled(&self, id: &str) -> Option<bool> {
        self.inner.lock().factories.effective(id)
    }

    /// Effective state of a provider
    pub fn is_provider_enabled(&self, id: &str) -> Option<bool> {
        self.inner.lock().providers.effective(id)
    }

    /// Parent of a factory
    pub fn factory_parent(&self, id: &str) -> Option<String> {
        self.inner.lock().factories.parent(id).map(str::to_string)
    }

    /// Parent of a provider
    pub fn provider_parent(&self, id: &str) -> Option<String> {
        self.inner.lock().providers.parent(id).map(str::to_string)
    }

    /// Registered provider ids
    pub fn provider_ids(&self) -> Vec<String> {
        self.inner.lock().providers.ids().map(str::to_string).collect()
    }

    /// Snapshot of one statistic
    pub fn statistic(&self, factory: &str, provider: &str) -> Option<StatisticSnapshot> {
        let inner = self.inner.lock();
        inner
            .statistics
            .get(&(factory.to_string(), provider.to_string()))
            .map(|s| snapshot(factory, provider, s))
    }

    /// Snapshots of every statistic of a provider
    pub fn statistics_of(&self, provider: &str) -> Vec<StatisticSnapshot> {
        let inner = self.inner.lock();
        inner
            .statistics
            .iter()
            .filter(|((_, p), _)| p == provider)
            .map(|((f, p), s)| snapshot(f, p, s))
            .collect()
    }

    /// Zero a statistic and restart its clock
    pub fn reset(&self, factory: &str, provider: &str) -> Result<(), StatisticError> {
        let mut inner = self.inner.lock();
        let stat = inner
            .statistics
            .get_mut(&(factory.to_string(), provider.to_string()))
            .ok_or_else(|| StatisticError::UnknownStatistic {
                factory: factory.to_string(),
                provider: provider.to_string(),
            })?;
        stat.value = StatisticValue::zero(stat.kind);
        stat.since = Instant::now();
        Ok(())
    }

    /// Record a finished call for `provider` and each of its ancestors
    pub fn record_call(&self, provider: &str, elapsed: Duration, failed: bool) {
        let mut inner = self.inner.lock();
        if !inner.running {
            return;
        }
        let lineage = inner.providers.lineage(provider);
        for ((_, p), stat) in inner.statistics.iter_mut() {
            if lineage.contains(p) {
                stat.record(elapsed, failed);
            }
        }
    }

    /// Whether calls are being recorded
    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }
}

fn snapshot(factory: &str, provider: &str, stat: &Statistic) -> StatisticSnapshot {
    StatisticSnapshot {
        factory: factory.to_string(),
        provider: provider.to_string(),
        mode: stat.mode,
        active: stat.active,
        value: stat.value,
        elapsed: if stat.active {
            stat.since.elapsed()
        } else {
            Duration::ZERO
        },
    }
}

impl Component for StatisticComponent {
    fn name(&self) -> &str {
        "statistics"
    }

    fn start(&self) -> Result<(), ComponentError> {
        self.inner.lock().running = true;
        info!("Statistic component started");
        Ok(())
    }

    fn stop(&self) -> Result<(), ComponentError> {
        self.inner.lock().running = false;
        info!("Statistic component stopped");
        Ok(())
    }
}

impl std::fmt::Debug for StatisticComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("StatisticComponent")
            .field("statistics", &inner.statistics.len())
            .field("running", &inner.running)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> StatisticComponent {
        let component = StatisticComponent::new(true);
        component.start().unwrap();
        component
    }

    #[test]
    fn test_builtin_factories() {
        let component = StatisticComponent::new(true);
        assert_eq!(component.factory_parent(FACTORY_CALL_COUNT).as_deref(), Some(FACTORY_CALL));
        assert_eq!(component.factory_parent(FACTORY_CALL).as_deref(), Some(FACTORY_EJB));
        assert_eq!(component.is_factory_enabled(FACTORY_EJB), Some(true));
    }

    #[test]
    fn test_auto_statistic_follows_factory_and_provider() {
        let component = started();
        component.register_provider("srv").unwrap();
        component.register_provider("srv/c1").unwrap();
        assert!(component.statistic(FACTORY_CALL_COUNT, "srv/c1").unwrap().active);

        component
            .set_factory_mode(FACTORY_CALL, NodeMode::Manual(false))
            .unwrap();
        assert!(!component.statistic(FACTORY_CALL_COUNT, "srv/c1").unwrap().active);

        component
            .set_factory_mode(FACTORY_CALL, NodeMode::Inherit)
            .unwrap();
        component
            .set_provider_mode("srv", NodeMode::Manual(false))
            .unwrap();
        assert!(!component.statistic(FACTORY_CALL_COUNT, "srv/c1").unwrap().active);
    }

    #[test]
    fn test_manual_statistic_keeps_state() {
        let component = started();
        component.register_provider("srv").unwrap();
        component
            .set_statistic_mode(FACTORY_CALL_COUNT, "srv", StatisticMode::Manual(true))
            .unwrap();
        component
            .set_factory_mode(FACTORY_EJB, NodeMode::Manual(false))
            .unwrap();
        assert!(component.statistic(FACTORY_CALL_COUNT, "srv").unwrap().active);
        assert!(!component.statistic(FACTORY_CALL_ERRORS, "srv").unwrap().active);
    }

    #[test]
    fn test_record_reaches_ancestors() {
        let component = started();
        component.register_provider("srv").unwrap();
        component.register_provider("srv/c1").unwrap();
        component.register_provider("srv/c1/Cart").unwrap();
        component.record_call("srv/c1/Cart", Duration::from_micros(100), false);
        component.record_call("srv/c1/Cart", Duration::from_micros(300), true);

        let count = component.statistic(FACTORY_CALL_COUNT, "srv/c1").unwrap();
        assert_eq!(count.value, StatisticValue::Count(2));
        let errors = component.statistic(FACTORY_CALL_ERRORS, "srv/c1/Cart").unwrap();
        assert_eq!(errors.value, StatisticValue::Count(1));
        let duration = component.statistic(FACTORY_CALL_DURATION, "srv").unwrap();
        assert_eq!(duration.value.as_u64(), 200);
    }

    #[test]
    fn test_reactivation_resets_value() {
        let component = started();
        component.register_provider("srv").unwrap();
        component.record_call("srv", Duration::from_micros(10), false);
        component
            .set_provider_mode("srv", NodeMode::Manual(false))
            .unwrap();
        component.set_provider_mode("srv", NodeMode::Inherit).unwrap();
        let count = component.statistic(FACTORY_CALL_COUNT, "srv").unwrap();
        assert_eq!(count.value, StatisticValue::Count(0));
    }

    #[test]
    fn test_unregister_provider_drops_statistics() {
        let component = started();
        component.register_provider("srv").unwrap();
        assert_eq!(component.statistics_of("srv").len(), 3);
        component.unregister_provider("srv").unwrap();
        assert!(component.statistics_of("srv").is_empty());
    }

    #[test]
    fn test_unregistering_middle_provider_reparents_statistics() {
        let component = started();
        component.register_provider("srv").unwrap();
        component.register_provider("srv/c1").unwrap();
        component.register_provider("srv/c1/Cart").unwrap();
        component
            .set_provider_mode("srv/c1", NodeMode::Manual(false))
            .unwrap();
        assert!(!component.statistic(FACTORY_CALL_COUNT, "srv/c1/Cart").unwrap().active);

        component.unregister_provider("srv/c1").unwrap();
        assert_eq!(component.provider_parent("srv/c1/Cart").as_deref(), Some("srv"));
        assert!(component.statistics_of("srv/c1").is_empty());
        let cart = component.statistic(FACTORY_CALL_COUNT, "srv/c1/Cart").unwrap();
        assert!(cart.active);
        assert_eq!(cart.mode, StatisticMode::Auto);

        component.record_call("srv/c1/Cart", Duration::from_micros(10), false);
        assert_eq!(
            component.statistic(FACTORY_CALL_COUNT, "srv").unwrap().value,
            StatisticValue::Count(1)
        );
    }

    #[test]
    fn test_reparented_statistics_follow_new_ancestor() {
        let component = started();
        component.register_provider("srv").unwrap();
        component.register_provider("srv/c1").unwrap();
        component.register_provider("srv/c1/Cart").unwrap();
        component
            .set_provider_mode("srv", NodeMode::Manual(false))
            .unwrap();
        component
            .set_provider_mode("srv/c1", NodeMode::Manual(true))
            .unwrap();
        component
            .set_statistic_mode(FACTORY_CALL_ERRORS, "srv/c1/Cart", StatisticMode::Manual(true))
            .unwrap();
        assert!(component.statistic(FACTORY_CALL_COUNT, "srv/c1/Cart").unwrap().active);

        component.unregister_provider("srv/c1").unwrap();
        assert!(!component.statistic(FACTORY_CALL_COUNT, "srv/c1/Cart").unwrap().active);
        assert!(component.statistic(FACTORY_CALL_ERRORS, "srv/c1/Cart").unwrap().active);
    }

    #[test]
    fn test_disabled_root_deactivates_auto_statistics() {
        let component = StatisticComponent::new(false);
        component.register_provider("srv").unwrap();
        assert!(!component.statistic(FACTORY_CALL_COUNT, "srv").unwrap().active);
        component.set_factories_enabled(true);
        assert!(component.statistic(FACTORY_CALL_COUNT, "srv").unwrap().active);
    }

    #[test]
    fn test_stopped_component_records_nothing() {
        let component = StatisticComponent::new(true);
        component.register_provider("srv").unwrap();
        component.record_call("srv", Duration::from_micros(10), false);
        assert_eq!(
            component.statistic(FACTORY_CALL_COUNT, "srv").unwrap().value,
            StatisticValue::Count(0)
        );
    }
}
