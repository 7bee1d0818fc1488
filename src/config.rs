use crate::error::Result;
use serde::Deserialize;

/// Tree-wide switches, usually left at their defaults or read from YAML.
///
/// ```rust
/// # use behavior_tree_core::TreeConfig;
/// let config = TreeConfig::from_yaml("tick_sleep_ms: 5\nauto_remapping: true").unwrap();
/// assert_eq!(config.tick_sleep_ms, 5);
/// assert!(config.auto_remapping);
/// assert!(!config.throw_if_multiple_running);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Reactive controls fail with a logic error when more than one of their
    /// asynchronous children is running.
    pub throw_if_multiple_running: bool,
    /// Default sleep between ticks for drivers that don't pass their own.
    pub tick_sleep_ms: u64,
    /// Default for subtrees that don't say whether they auto-remap.
    pub auto_remapping: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            throw_if_multiple_running: false,
            tick_sleep_ms: 10,
            auto_remapping: false,
        }
    }
}

impl TreeConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn tick_sleep(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_sleep_ms)
    }
}
