use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Environment variable that overrides the sorting mode in [`Config::from_env`].
pub const SORTING_MODE_ENV: &str = "ENCORE_TRACE_SORTING_MODE";

/// How the reordering engine turns the packet stream into a sorted timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortingMode {
    /// Windowed sorting driven by flush and read-buffer lifecycle events.
    #[default]
    Heuristic,
    /// Buffers the whole trace and sorts once at end of stream.
    FullSort,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sorting mode {0:?}, expected \"heuristic\" or \"full_sort\"")]
pub struct UnknownSortingMode(String);

impl FromStr for SortingMode {
    type Err = UnknownSortingMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heuristic" | "default" => Ok(SortingMode::Heuristic),
            "full_sort" => Ok(SortingMode::FullSort),
            "force_flush_period_windowed_sort" => {
                log::warn!(
                    "sorting mode {s:?} is deprecated; windowed sorting now follows the \
                     lifecycle events in the trace, using \"heuristic\""
                );
                Ok(SortingMode::Heuristic)
            }
            other => Err(UnknownSortingMode(other.to_string())),
        }
    }
}

/// Ingestion options. Selected up front; they cannot change mid-session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sorting_mode: SortingMode,
}

impl Config {
    /// The default config, with the sorting mode taken from the environment if set.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Ok(value) = std::env::var(SORTING_MODE_ENV) {
            match value.parse() {
                Ok(mode) => config.sorting_mode = mode,
                Err(err) => log::warn!("ignoring {SORTING_MODE_ENV}: {err}"),
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sorting_mode() {
        assert_eq!("full_sort".parse(), Ok(SortingMode::FullSort));
        assert_eq!("heuristic".parse(), Ok(SortingMode::Heuristic));
        assert_eq!(
            "force_flush_period_windowed_sort".parse(),
            Ok(SortingMode::Heuristic)
        );
        assert!("sorted".parse::<SortingMode>().is_err());
    }

    #[test]
    fn test_deserialize_config() {
        let config: Config = serde_json::from_str(r#"{"sorting_mode": "full_sort"}"#).unwrap();
        assert_eq!(config.sorting_mode, SortingMode::FullSort);

        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.sorting_mode, SortingMode::Heuristic);
    }
}
