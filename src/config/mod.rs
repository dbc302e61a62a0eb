//! Configuration module for the overcloud deployment orchestrator.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `overcloud.deploy.yaml`
//! - Validation of configuration values
//! - Computing configuration fingerprints recorded with each run

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{find_config_file, ConfigParser, AUTH_TOKEN_VAR, DEFAULT_CONFIG_FILES};
pub use spec::{
    ConcurrencyConfig, DeployConfig, LifecycleConfig, LifecycleStageConfig, PlanBackendKind,
    PlanConfig, PlanStoreConfig, PollingConfig, RetryConfig, RoleConfig, RoleKind,
    ServicesConfig, StackConfig, WorkflowsConfig, DEFAULT_STACK_NAME,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
