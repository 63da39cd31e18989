use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use rayfold_error::{DbError, Result, ResultExt};

use crate::cancel::PollInterval;
use crate::execution::merge::MergeConfig;

/// Default upper bound on how long the merge waits before re-checking
/// cancellation.
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for running an aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationConfig {
    /// Mask controlling how often partition loops check for cancellation.
    pub poll_interval: PollInterval,
    /// How long the merge blocks waiting on partitions before checking the
    /// cancellation token again.
    pub wait_interval: Duration,
    /// Merge policy used when streaming partition results.
    pub merge: MergeConfig,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig {
            poll_interval: PollInterval::default(),
            wait_interval: DEFAULT_WAIT_INTERVAL,
            merge: MergeConfig::default(),
        }
    }
}

impl AggregationConfig {
    /// Set a named setting from its string representation.
    pub fn set_from_str(&mut self, name: &str, value: &str) -> Result<()> {
        let func = SETTING_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::new(format!("Missing setting for '{name}'")))?;

        (func.set)(value, self)
    }

    pub fn get_as_string(&self, name: &str) -> Result<String> {
        let func = SETTING_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::new(format!("Missing setting for '{name}'")))?;

        Ok((func.get)(self))
    }

    /// Names and descriptions of all settings, sorted by name.
    pub fn describe_settings() -> Vec<(&'static str, &'static str)> {
        let mut settings: Vec<_> = SETTING_FUNCTIONS
            .iter()
            .map(|(name, func)| (*name, func.description))
            .collect();
        settings.sort_unstable();
        settings
    }
}

struct SettingFunctions {
    description: &'static str,
    set: fn(value: &str, conf: &mut AggregationConfig) -> Result<()>,
    get: fn(conf: &AggregationConfig) -> String,
}

impl SettingFunctions {
    const fn new<S: AggregationSetting>() -> Self {
        SettingFunctions {
            description: S::DESCRIPTION,
            set: S::set_from_str as _,
            get: S::get_as_string as _,
        }
    }
}

fn insert_setting<S: AggregationSetting>(map: &mut HashMap<&'static str, SettingFunctions>) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static SETTING_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> =
    LazyLock::new(|| {
        let mut map = HashMap::new();

        insert_setting::<PollIntervalSetting>(&mut map);
        insert_setting::<WaitIntervalSetting>(&mut map);
        insert_setting::<MergeSetting>(&mut map);

        map
    });

pub trait AggregationSetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_str(value: &str, conf: &mut AggregationConfig) -> Result<()>;
    fn get_as_string(conf: &AggregationConfig) -> String;
}

pub struct PollIntervalSetting;

impl AggregationSetting for PollIntervalSetting {
    const NAME: &'static str = "poll_interval";
    const DESCRIPTION: &'static str =
        "Bitmask for cancellation checks in partition loops, one less than a power of two";

    fn set_from_str(value: &str, conf: &mut AggregationConfig) -> Result<()> {
        let mask = value.parse::<usize>().context("Failed to parse poll interval")?;
        conf.poll_interval = PollInterval::try_new(mask)?;
        Ok(())
    }

    fn get_as_string(conf: &AggregationConfig) -> String {
        conf.poll_interval.mask().to_string()
    }
}

pub struct WaitIntervalSetting;

impl WaitIntervalSetting {
    pub fn validate_value(millis: u64) -> Result<()> {
        if millis == 0 {
            return Err(DbError::new("Wait interval must be at least 1ms"));
        }
        Ok(())
    }
}

impl AggregationSetting for WaitIntervalSetting {
    const NAME: &'static str = "wait_interval_ms";
    const DESCRIPTION: &'static str =
        "Milliseconds the merge waits on partitions before re-checking cancellation";

    fn set_from_str(value: &str, conf: &mut AggregationConfig) -> Result<()> {
        let millis = value.parse::<u64>().context("Failed to parse wait interval")?;
        Self::validate_value(millis)?;
        conf.wait_interval = Duration::from_millis(millis);
        Ok(())
    }

    fn get_as_string(conf: &AggregationConfig) -> String {
        conf.wait_interval.as_millis().to_string()
    }
}

pub struct MergeSetting;

impl AggregationSetting for MergeSetting {
    const NAME: &'static str = "merge";
    const DESCRIPTION: &'static str =
        "How partition results are streamed: not_buffered, auto_buffered, or fully_buffered";

    fn set_from_str(value: &str, conf: &mut AggregationConfig) -> Result<()> {
        conf.merge = value.parse()?;
        Ok(())
    }

    fn get_as_string(conf: &AggregationConfig) -> String {
        conf.merge.to_string()
    }
}
