//! Error types for the orchestration core
//!
//! This module defines all error types used throughout the system.
//! `Display` and `Error` are implemented by hand (see note on the impls below).
//!
//! The taxonomy mirrors where a failure is isolated:
//! - `DataGeneration`, `GenericResolution`, `InstanceConstruction`: one row
//! - `CircularDataSource`: one definition, detected before expansion
//! - `DependencyCycle`, `DependencyFailed`, `DependencyNotFound`: one graph node
//! - `Contract`: scheduler bookkeeping violation, fatal to the run
//! - `Config`: configuration file could not be read or parsed

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the orchestration core
#[derive(Debug, Clone)]
pub enum Error {
    /// A data source threw while producing an argument row
    DataGeneration {
        /// Name of the data source that failed
        source: String,
        /// Underlying failure message
        message: String,
    },

    /// Generic type unification or constraint checking failed
    GenericResolution(String),

    /// The instance factory threw or returned no instance
    InstanceConstruction {
        /// Qualified name of the class under construction
        class: String,
        /// Underlying failure message
        message: String,
    },

    /// A class-level data source requires an instance that cannot exist yet
    CircularDataSource {
        /// Qualified name of the affected class
        class: String,
        /// Name of the offending data source
        source: String,
    },

    /// A dependency cycle was detected in the test graph
    DependencyCycle {
        /// Rendered cycle path, e.g. `A > B > C > A`
        path: String,
    },

    /// A dependency terminated in Failed and proceed-on-failure is not set
    DependencyFailed {
        /// Display name of the failed dependency
        dependency: String,
    },

    /// A declared depends-on target matched no known test identity
    DependencyNotFound(String),

    /// Invocation exceeded the configured timeout
    Timeout(u64),

    /// Scheduler bookkeeping violated its own contract; fatal to the run
    Contract(String),

    /// Configuration could not be read or parsed
    Config(String),
}

// `Display` and `Error` are implemented by hand rather than via
// `#[derive(thiserror::Error)]` because thiserror treats any field named
// `source` as the error source and `String` does not implement
// `std::error::Error`. The messages match the documented formats above.
impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::DataGeneration { source, message } => {
                write!(f, "data generation failed in source '{source}': {message}")
            }
            Error::GenericResolution(msg) => {
                write!(f, "generic resolution failed: {msg}")
            }
            Error::InstanceConstruction { class, message } => {
                write!(f, "instance construction failed for {class}: {message}")
            }
            Error::CircularDataSource { class, source } => {
                write!(
                    f,
                    "class-level data source '{source}' on {class} requires a test instance, but the instance cannot be constructed before its class arguments exist"
                )
            }
            Error::DependencyCycle { path } => {
                write!(f, "dependency cycle detected: {path}")
            }
            Error::DependencyFailed { dependency } => {
                write!(f, "dependency '{dependency}' failed")
            }
            Error::DependencyNotFound(target) => {
                write!(f, "depends-on target not found: {target}")
            }
            Error::Timeout(ms) => {
                write!(f, "test timed out after {ms}ms")
            }
            Error::Contract(msg) => {
                write!(f, "scheduler contract violation: {msg}")
            }
            Error::Config(msg) => {
                write!(f, "configuration error: {msg}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Short category label used in synthesized failed-test identities
    pub fn category(&self) -> &'static str {
        match self {
            Error::DataGeneration { .. } => "DataGenerationError",
            Error::GenericResolution(_) => "GenericResolutionError",
            Error::InstanceConstruction { .. } => "InstanceConstructionError",
            Error::CircularDataSource { .. } => "CircularDependencyError",
            Error::DependencyCycle { .. } => "DependencyCycleError",
            Error::DependencyFailed { .. } => "DependencyFailedError",
            Error::DependencyNotFound(_) => "DependencyNotFoundError",
            Error::Timeout(_) => "TimeoutError",
            Error::Contract(_) => "ContractError",
            Error::Config(_) => "ConfigError",
        }
    }

    /// Whether this error is fatal to the whole run rather than isolated
    /// to a single test or definition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Contract(_) | Error::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_data_generation() {
        let err = Error::DataGeneration {
            source: "numbers".to_string(),
            message: "generator panicked".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("data generation failed"));
        assert!(msg.contains("numbers"));
        assert!(msg.contains("generator panicked"));
    }

    #[test]
    fn test_error_display_cycle_renders_path() {
        let err = Error::DependencyCycle {
            path: "A > B > A".to_string(),
        };
        assert!(err.to_string().contains("A > B > A"));
    }

    #[test]
    fn test_error_display_dependency_failed_names_dependency() {
        let err = Error::DependencyFailed {
            dependency: "Setup".to_string(),
        };
        assert!(err.to_string().contains("Setup"));
    }

    #[test]
    fn test_error_display_circular_source() {
        let err = Error::CircularDataSource {
            class: "acme.WidgetTests".to_string(),
            source: "widget_rows".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("widget_rows"));
        assert!(msg.contains("acme.WidgetTests"));
    }

    #[test]
    fn test_error_categories_are_distinct() {
        let a = Error::GenericResolution("x".into()).category();
        let b = Error::Timeout(5).category();
        assert_ne!(a, b);
    }

    #[test]
    fn test_only_contract_and_config_are_fatal() {
        assert!(Error::Contract("dup".into()).is_fatal());
        assert!(Error::Config("bad toml".into()).is_fatal());
        assert!(!Error::GenericResolution("x".into()).is_fatal());
        assert!(!Error::Timeout(1).is_fatal());
    }
}
