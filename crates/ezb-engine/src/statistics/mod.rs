//! Statistics
//!
//! Hierarchical enable/disable state for statistic factories and providers,
//! and the component recording call statistics of every bean factory.

pub mod component;
pub mod tree;

pub use component::{
    StatisticComponent, StatisticKind, StatisticMode, StatisticSnapshot, StatisticValue,
    FACTORY_CALL, FACTORY_CALL_COUNT, FACTORY_CALL_DURATION, FACTORY_CALL_ERRORS, FACTORY_EJB,
};
pub use tree::{HierarchyTree, NodeMode, ParentRule, StatisticError};

/// Provider id of a container
pub fn container_provider(server: &str, container: &str) -> String {
    format!("{}/{}", server, container)
}

/// Provider id of a bean factory
pub fn factory_provider(server: &str, container: &str, bean: &str) -> String {
    format!("{}/{}/{}", server, container, bean)
}
