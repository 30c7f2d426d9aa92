//! Checker registry for configuration-driven construction.
//!
//! Checker variants are looked up by name so that test-case files can say
//! `checker_name: RegexChecker` instead of going through a hardcoded match.
//! Each variant contributes a [`CheckerFactory`] that turns a JSON object of
//! constructor arguments into a ready checker.
//!
//! ## Usage
//!
//! ```
//! use lve_core::checkers::{create_checker, Checker};
//! use serde_json::json;
//!
//! let checker = create_checker("RegexChecker", &json!({"pattern": "^safe$", "match_safe": true}))?;
//! assert_eq!(checker.name(), "RegexChecker");
//! # Ok::<(), lve_core::checkers::CheckerError>(())
//! ```
//!
//! The process-wide registry is seeded with the built-in variants on first
//! access. Readers get a snapshot; mutating it leaves the registry untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use super::{
    BaseChecker, Checker, CheckerConfig, CheckerError, LambdaCheckerFactory,
    NumberCheckerFactory, RegexCheckerFactory,
};

/// Factory for creating checkers from configuration.
pub trait CheckerFactory: Send + Sync {
    /// The name the checker type is registered under.
    ///
    /// Examples: "LambdaChecker", "RegexChecker"
    fn checker_type(&self) -> &'static str;

    /// Create a checker from its constructor arguments.
    ///
    /// # Arguments
    /// * `args` - Constructor arguments as a JSON object (`null` means none)
    fn create(&self, args: &JsonValue) -> Result<Arc<dyn Checker>, CheckerError>;

    /// Validate arguments without keeping the checker.
    fn validate_config(&self, args: &JsonValue) -> Result<(), CheckerError> {
        self.create(args).map(|_| ())
    }

    /// Human-readable description of this checker type.
    fn description(&self) -> &'static str {
        "Checker"
    }
}

/// Deserialize constructor arguments, treating `null` as no arguments.
pub(crate) fn parse_args<T: DeserializeOwned>(
    checker: &str,
    args: &JsonValue,
) -> Result<T, CheckerError> {
    let args = match args {
        JsonValue::Null => JsonValue::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(args)
        .map_err(|e| CheckerError::InvalidConfig(format!("{}: {}", checker, e)))
}

/// Builds [`BaseChecker`] from an optional [`CheckerConfig`] object.
pub struct BaseCheckerFactory;

impl CheckerFactory for BaseCheckerFactory {
    fn checker_type(&self) -> &'static str {
        "BaseChecker"
    }

    fn create(&self, args: &JsonValue) -> Result<Arc<dyn Checker>, CheckerError> {
        let config: CheckerConfig = parse_args(self.checker_type(), args)?;
        Ok(Arc::new(BaseChecker::new(config)))
    }

    fn description(&self) -> &'static str {
        "Base checker contract without a safety predicate"
    }
}

/// A name to factory mapping, as returned by [`checker_registry`].
pub type CheckerTable = BTreeMap<String, Arc<dyn CheckerFactory>>;

/// Registry of available checker factories.
#[derive(Default)]
pub struct CheckerRegistry {
    factories: CheckerTable,
}

impl CheckerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with all built-in checkers registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BaseCheckerFactory));
        registry.register(Arc::new(LambdaCheckerFactory));
        registry.register(Arc::new(NumberCheckerFactory));
        registry.register(Arc::new(RegexCheckerFactory));
        registry
    }

    /// Register a checker factory.
    ///
    /// A factory registered under an existing name replaces the old one.
    pub fn register(&mut self, factory: Arc<dyn CheckerFactory>) {
        let name = factory.checker_type();
        if self.factories.insert(name.to_string(), factory).is_some() {
            tracing::debug!(checker = name, "Replaced registered checker");
        } else {
            tracing::debug!(checker = name, "Registered checker");
        }
    }

    /// Create a checker from type name and constructor arguments.
    pub fn create(
        &self,
        checker_type: &str,
        args: &JsonValue,
    ) -> Result<Arc<dyn Checker>, CheckerError> {
        self.factories
            .get(checker_type)
            .ok_or_else(|| CheckerError::UnknownChecker {
                name: checker_type.to_string(),
                available: self.available_types().into_iter().map(String::from).collect(),
            })?
            .create(args)
    }

    /// List registered checker names.
    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    /// Check if a checker type is registered.
    pub fn has_checker(&self, checker_type: &str) -> bool {
        self.factories.contains_key(checker_type)
    }

    /// Get the factory for a checker type.
    pub fn get_factory(&self, checker_type: &str) -> Option<&Arc<dyn CheckerFactory>> {
        self.factories.get(checker_type)
    }

    /// Copy of the name to factory mapping.
    pub fn snapshot(&self) -> CheckerTable {
        self.factories.clone()
    }
}

impl std::fmt::Debug for CheckerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckerRegistry")
            .field("checkers", &self.available_types())
            .finish()
    }
}

lazy_static! {
    static ref REGISTRY: RwLock<CheckerRegistry> = RwLock::new(CheckerRegistry::with_builtins());
}

/// Add a checker type to the process-wide registry.
pub fn register_checker(factory: Arc<dyn CheckerFactory>) {
    REGISTRY.write().register(factory);
}

/// Snapshot of the process-wide registry.
pub fn checker_registry() -> CheckerTable {
    REGISTRY.read().snapshot()
}

/// Create a checker through the process-wide registry.
pub fn create_checker(
    checker_type: &str,
    args: &JsonValue,
) -> Result<Arc<dyn Checker>, CheckerError> {
    REGISTRY.read().create(checker_type, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::CheckArgs;
    use crate::prompt::Message;
    use proptest::prelude::*;
    use serde_json::json;

    #[derive(Debug)]
    struct ConstantChecker {
        verdict: bool,
    }

    impl Checker for ConstantChecker {
        fn name(&self) -> &'static str {
            "ConstantChecker"
        }

        fn config(&self) -> CheckerConfig {
            CheckerConfig::default()
        }

        fn is_safe(&self, _args: CheckArgs<'_>) -> Result<bool, CheckerError> {
            Ok(self.verdict)
        }
    }

    struct ConstantCheckerFactory;

    impl CheckerFactory for ConstantCheckerFactory {
        fn checker_type(&self) -> &'static str {
            "ConstantChecker"
        }

        fn create(&self, args: &JsonValue) -> Result<Arc<dyn Checker>, CheckerError> {
            let verdict = args["verdict"].as_bool().unwrap_or(true);
            Ok(Arc::new(ConstantChecker { verdict }))
        }

        fn description(&self) -> &'static str {
            "Always returns the configured verdict"
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = CheckerRegistry::with_builtins();
        assert_eq!(
            registry.available_types(),
            vec!["BaseChecker", "LambdaChecker", "NumberChecker", "RegexChecker"]
        );
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = CheckerRegistry::new();
        registry.register(Arc::new(ConstantCheckerFactory));

        assert!(registry.has_checker("ConstantChecker"));
        assert!(!registry.has_checker("unknown"));

        let checker = registry
            .create("ConstantChecker", &json!({"verdict": false}))
            .unwrap();
        let prompt = vec![Message::assistant("x")];
        assert!(!checker.invoke_check(&prompt, &prompt, None).unwrap().is_safe);
    }

    #[test]
    fn test_unknown_checker() {
        let registry = CheckerRegistry::with_builtins();
        match registry.create("NopeChecker", &json!({})) {
            Err(CheckerError::UnknownChecker { name, available }) => {
                assert_eq!(name, "NopeChecker");
                assert!(available.contains(&"RegexChecker".to_string()));
            }
            other => panic!("Expected UnknownChecker, got {:?}", other.map(|c| c.name())),
        }
    }

    #[test]
    fn test_last_registration_wins() {
        struct Replacement;
        impl CheckerFactory for Replacement {
            fn checker_type(&self) -> &'static str {
                "ConstantChecker"
            }
            fn create(&self, _args: &JsonValue) -> Result<Arc<dyn Checker>, CheckerError> {
                Ok(Arc::new(ConstantChecker { verdict: false }))
            }
            fn description(&self) -> &'static str {
                "replacement"
            }
        }

        let mut registry = CheckerRegistry::new();
        registry.register(Arc::new(ConstantCheckerFactory));
        registry.register(Arc::new(Replacement));

        assert_eq!(registry.available_types().len(), 1);
        assert_eq!(
            registry.get_factory("ConstantChecker").unwrap().description(),
            "replacement"
        );
    }

    #[test]
    fn test_base_checker_factory_reads_config() {
        let checker = BaseCheckerFactory
            .create(&json!({"get_variables": true}))
            .unwrap();
        assert!(checker.config().wants_variable_mapping);
        assert!(checker.config().wants_response_text);

        let default = BaseCheckerFactory.create(&JsonValue::Null).unwrap();
        assert_eq!(default.config(), CheckerConfig::default());
    }

    #[test]
    fn test_validate_config_uses_create() {
        assert!(RegexCheckerFactory
            .validate_config(&json!({"pattern": "(", "match_safe": true}))
            .is_err());
        assert!(LambdaCheckerFactory
            .validate_config(&json!({"func": "lambda r: True"}))
            .is_ok());
    }

    #[test]
    fn test_global_registry_sees_new_checker() {
        register_checker(Arc::new(ConstantCheckerFactory));
        assert!(checker_registry().contains_key("ConstantChecker"));
        assert!(create_checker("ConstantChecker", &JsonValue::Null).is_ok());
    }

    #[test]
    fn test_snapshot_mutation_does_not_leak() {
        let mut snapshot = checker_registry();
        snapshot.remove("RegexChecker");
        snapshot.insert("Bogus".to_string(), Arc::new(ConstantCheckerFactory));

        let fresh = checker_registry();
        assert!(fresh.contains_key("RegexChecker"));
        assert!(!fresh.contains_key("Bogus"));
    }

    #[test]
    fn test_debug_lists_checkers() {
        let debug = format!("{:?}", CheckerRegistry::with_builtins());
        assert!(debug.contains("LambdaChecker"));
    }

    proptest! {
        #[test]
        fn prop_snapshot_is_isolated(names in proptest::collection::vec("[A-Z][a-z]{2,8}", 0..6)) {
            let mut snapshot = checker_registry();
            for name in &names {
                snapshot.insert(format!("Snap{}", name), Arc::new(ConstantCheckerFactory));
            }
            snapshot.clear();

            let fresh = checker_registry();
            prop_assert!(fresh.contains_key("BaseChecker"));
            for name in &names {
                let key = format!("Snap{}", name);
                prop_assert!(!fresh.contains_key(&key));
            }
        }
    }
}
