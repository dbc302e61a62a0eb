//! Configuration hashing for change detection.
//!
//! Fingerprints recorded with every run so an operator can tell which
//! configuration a run was started from.

use sha2::{Digest, Sha256};

use super::spec::{DeployConfig, PlanConfig};

/// Hasher for computing configuration fingerprints.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the parts of the configuration that shape the stack.
    ///
    /// Timing, retry and concurrency settings are left out; they change how a
    /// run is watched, not what it deploys.
    #[must_use]
    pub fn hash_config(&self, config: &DeployConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.stack.name.as_bytes());
        hasher.update(self.hash_plan(&config.plan).as_bytes());

        for role in &config.roles {
            hasher.update(role.name.as_bytes());
            hasher.update([role.kind as u8]);
        }

        for stage in [
            &config.lifecycle.update,
            &config.lifecycle.upgrade,
            &config.lifecycle.ffwd_upgrade,
        ] {
            update_json(&mut hasher, &stage.prepare_environment);
            update_json(&mut hasher, &stage.converge_environment);
            update_json(&mut hasher, &stage.release_skip);
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash of the plan section.
    #[must_use]
    pub fn hash_plan(&self, plan: &PlanConfig) -> String {
        let mut hasher = Sha256::new();

        if let Some(name) = &plan.name {
            hasher.update(name.as_bytes());
        }
        hasher.update(plan.templates_dir.to_string_lossy().as_bytes());

        // Environment order matters: later files win.
        for env in &plan.environments {
            hasher.update(env.to_string_lossy().as_bytes());
            hasher.update([0u8]);
        }

        update_json(&mut hasher, &plan.parameters);

        let mut generated: Vec<_> = plan.generated_passwords.iter().collect();
        generated.sort();
        for key in generated {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes in constant time.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Feeds the canonical JSON form of a sorted map into the hasher.
fn update_json<T: serde::Serialize>(hasher: &mut Sha256, value: &T) {
    if let Ok(bytes) = serde_json::to_vec(value) {
        hasher.update(&bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_plan_hash_deterministic() {
        let hasher = ConfigHasher::new();
        let mut plan = PlanConfig::default();
        plan.parameters.insert(String::from("ControllerCount"), 3.into());

        assert_eq!(hasher.hash_plan(&plan), hasher.hash_plan(&plan.clone()));
    }

    #[test]
    fn test_environment_order_changes_hash() {
        let hasher = ConfigHasher::new();
        let mut a = PlanConfig::default();
        a.environments = vec![PathBuf::from("net.yaml"), PathBuf::from("ssl.yaml")];
        let mut b = a.clone();
        b.environments.reverse();

        assert_ne!(hasher.hash_plan(&a), hasher.hash_plan(&b));
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        let short = hasher.short_hash("abcdef1234567890abcdef1234567890");

        assert_eq!(short, "abcdef12");
    }

    #[test]
    fn test_hashes_match() {
        assert!(ConfigHasher::hashes_match("abc123", "abc123"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc124"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc12"));
    }
}
