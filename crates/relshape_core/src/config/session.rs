use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use hashbrown::HashMap;
use relshape_error::{DbError, DbErrorKind, Result};
use serde::{Deserialize, Serialize};

use crate::scalar::ScalarValue;

/// How queries loading more than one collection are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuerySplittingBehavior {
    /// Single query, with an advisory when multiple collections are loaded.
    #[default]
    Unspecified,
    SingleQuery,
    SplitQuery,
}

impl QuerySplittingBehavior {
    pub const fn is_split(&self) -> bool {
        matches!(self, Self::SplitQuery)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::SingleQuery => "single_query",
            Self::SplitQuery => "split_query",
        }
    }
}

impl fmt::Display for QuerySplittingBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QuerySplittingBehavior {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "unspecified" => Self::Unspecified,
            "single_query" => Self::SingleQuery,
            "split_query" => Self::SplitQuery,
            other => {
                return Err(config_error(format!(
                    "Invalid query splitting behavior: '{other}'"
                )));
            }
        })
    }
}

/// How array valued parameters used with IN are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterizedCollectionMode {
    /// One placeholder per element. Commands are cached per array length.
    #[default]
    Parameters,
    /// Element values inlined into the command text. Never cached.
    Constants,
}

impl ParameterizedCollectionMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Parameters => "parameters",
            Self::Constants => "constants",
        }
    }
}

impl FromStr for ParameterizedCollectionMode {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "parameters" => Self::Parameters,
            "constants" => Self::Constants,
            other => {
                return Err(config_error(format!(
                    "Invalid parameterized collection mode: '{other}'"
                )));
            }
        })
    }
}

pub const DEFAULT_COMMAND_CACHE_CAPACITY: usize = 1024;
const MIN_COMMAND_CACHE_CAPACITY: usize = 16;
const MAX_COMMAND_CACHE_CAPACITY: usize = 1 << 20;

pub const DEFAULT_MAX_RETRY_COUNT: usize = 0;
const MAX_RETRY_COUNT: usize = 16;

/// Configuration for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub query_splitting_behavior: QuerySplittingBehavior,
    pub buffer_results: bool,
    pub command_cache_capacity: usize,
    pub max_retry_count: usize,
    pub parameterized_collection_mode: ParameterizedCollectionMode,
    pub warn_multiple_collections: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            query_splitting_behavior: QuerySplittingBehavior::Unspecified,
            buffer_results: false,
            command_cache_capacity: DEFAULT_COMMAND_CACHE_CAPACITY,
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            parameterized_collection_mode: ParameterizedCollectionMode::Parameters,
            warn_multiple_collections: true,
        }
    }
}

impl SessionConfig {
    pub fn set_from_scalar(&mut self, name: &str, value: ScalarValue) -> Result<()> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| missing_setting(name))?;

        (func.set)(value, self)
    }

    pub fn get_as_scalar(&self, name: &str) -> Result<ScalarValue> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| missing_setting(name))?;

        Ok((func.get)(self))
    }

    pub fn reset(&mut self, name: &str) -> Result<()> {
        let def_conf = Self::default();

        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| missing_setting(name))?;

        let scalar = (func.get)(&def_conf);
        (func.set)(scalar, self)
    }

    pub fn reset_all(&mut self) {
        *self = Self::default();
    }

    /// Names and descriptions of all settings.
    pub fn settings() -> impl Iterator<Item = (&'static str, &'static str)> {
        GET_SET_FUNCTIONS
            .iter()
            .map(|(name, funcs)| (*name, funcs.description))
    }
}

fn config_error(msg: impl Into<String>) -> DbError {
    DbError::with_kind(DbErrorKind::Config, msg)
}

fn missing_setting(name: &str) -> DbError {
    config_error(format!("Missing setting for '{name}'"))
}

struct SettingFunctions {
    description: &'static str,
    set: fn(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()>,
    get: fn(conf: &SessionConfig) -> ScalarValue,
}

impl SettingFunctions {
    const fn new<S: SessionSetting>() -> Self {
        SettingFunctions {
            description: S::DESCRIPTION,
            set: S::set_from_scalar as _,
            get: S::get_as_scalar as _,
        }
    }
}

fn insert_setting<S: SessionSetting>(map: &mut HashMap<&'static str, SettingFunctions>) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static GET_SET_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    insert_setting::<QuerySplitting>(&mut map);
    insert_setting::<BufferResults>(&mut map);
    insert_setting::<CommandCacheCapacity>(&mut map);
    insert_setting::<MaxRetryCount>(&mut map);
    insert_setting::<CollectionMode>(&mut map);
    insert_setting::<WarnMultipleCollections>(&mut map);

    map
});

pub trait SessionSetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_scalar(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()>;
    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue;
}

pub struct QuerySplitting;

impl SessionSetting for QuerySplitting {
    const NAME: &'static str = "query_splitting_behavior";
    const DESCRIPTION: &'static str =
        "How collections are loaded: 'unspecified', 'single_query', or 'split_query'";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        conf.query_splitting_behavior = scalar.try_as_str()?.parse()?;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        conf.query_splitting_behavior.as_str().into()
    }
}

pub struct BufferResults;

impl SessionSetting for BufferResults {
    const NAME: &'static str = "buffer_results";
    const DESCRIPTION: &'static str =
        "Read all rows into memory before materializing results";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        conf.buffer_results = scalar.try_as_bool()?;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        conf.buffer_results.into()
    }
}

pub struct CommandCacheCapacity;

impl SessionSetting for CommandCacheCapacity {
    const NAME: &'static str = "command_cache_capacity";
    const DESCRIPTION: &'static str = "Maximum number of compiled commands to keep cached";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        let val = scalar.try_as_usize()?;

        if val < MIN_COMMAND_CACHE_CAPACITY {
            return Err(config_error(format!(
                "Command cache capacity cannot be less than {MIN_COMMAND_CACHE_CAPACITY}"
            )));
        }

        if val > MAX_COMMAND_CACHE_CAPACITY {
            return Err(config_error(format!(
                "Command cache capacity cannot be greater than {MAX_COMMAND_CACHE_CAPACITY}"
            )));
        }

        conf.command_cache_capacity = val;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        (conf.command_cache_capacity as u64).into()
    }
}

pub struct MaxRetryCount;

impl SessionSetting for MaxRetryCount {
    const NAME: &'static str = "max_retry_count";
    const DESCRIPTION: &'static str =
        "Number of times to retry a query failing transiently before any rows are read";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        let val = scalar.try_as_usize()?;
        if val > MAX_RETRY_COUNT {
            return Err(config_error(format!(
                "Retry count cannot be greater than {MAX_RETRY_COUNT}"
            )));
        }
        conf.max_retry_count = val;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        (conf.max_retry_count as u64).into()
    }
}

pub struct CollectionMode;

impl SessionSetting for CollectionMode {
    const NAME: &'static str = "parameterized_collection_mode";
    const DESCRIPTION: &'static str =
        "How array parameters are rendered in IN lists: 'parameters' or 'constants'";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        conf.parameterized_collection_mode = scalar.try_as_str()?.parse()?;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        conf.parameterized_collection_mode.as_str().into()
    }
}

pub struct WarnMultipleCollections;

impl SessionSetting for WarnMultipleCollections {
    const NAME: &'static str = "warn_multiple_collections";
    const DESCRIPTION: &'static str =
        "Emit an advisory when a single query loads multiple collections";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        conf.warn_multiple_collections = scalar.try_as_bool()?;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        conf.warn_multiple_collections.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_setting_exists() {
        let mut conf = SessionConfig::default();
        conf.set_from_scalar("query_splitting_behavior", "split_query".into())
            .unwrap();

        assert_eq!(QuerySplittingBehavior::SplitQuery, conf.query_splitting_behavior);
        let val = conf.get_as_scalar("query_splitting_behavior").unwrap();
        assert_eq!("split_query", val.try_as_str().unwrap());
    }

    #[test]
    fn set_setting_not_exists() {
        let mut conf = SessionConfig::default();
        let err = conf.set_from_scalar("hello_world", 58.into()).unwrap_err();
        assert_eq!(DbErrorKind::Config, err.kind());
    }

    #[test]
    fn set_casts_value() {
        let mut conf = SessionConfig::default();
        conf.set_from_scalar("command_cache_capacity", ScalarValue::Int16(64))
            .unwrap();

        let val = conf.get_as_scalar("command_cache_capacity").unwrap();
        assert_eq!(ScalarValue::Int64(64), val);
    }

    #[test]
    fn capacity_out_of_range() {
        let mut conf = SessionConfig::default();
        conf.set_from_scalar("command_cache_capacity", 2.into())
            .unwrap_err();
    }

    #[test]
    fn reset_single() {
        let mut conf = SessionConfig::default();
        conf.set_from_scalar("buffer_results", true.into()).unwrap();
        conf.reset("buffer_results").unwrap();
        assert!(!conf.buffer_results);
    }

    #[test]
    fn serde_partial() {
        let conf: SessionConfig =
            serde_json::from_str(r#"{"parameterized_collection_mode": "constants"}"#).unwrap();
        assert_eq!(ParameterizedCollectionMode::Constants, conf.parameterized_collection_mode);
        assert_eq!(DEFAULT_COMMAND_CACHE_CAPACITY, conf.command_cache_capacity);
    }
}
