//! Storage class parameter resolution
//!
//! Turns the untyped parameter map of a storage class into a validated
//! [`ProvisionerConfig`]. Keys are matched case-insensitively through a
//! fixed option table; keys not in the table are ignored.

use crate::domain::ports::{BrickRoot, ProvisionerConfig};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

// =============================================================================
// Defaults
// =============================================================================

/// Namespace searched for storage-node pods when none is given
pub const DEFAULT_NAMESPACE: &str = "default";

/// Selector matching storage-node pods when none is given
pub const DEFAULT_LABEL_SELECTOR: &str = "glusterfs-node==pod";

/// Host bound to brick root entries written as a bare path
pub const DEFAULT_BRICK_HOST: &str = "localhost";

// =============================================================================
// Option Table
// =============================================================================

type Setter = fn(&mut ProvisionerConfig, &str) -> Result<()>;

/// Recognised parameters, keyed by lowercase name
const OPTIONS: &[(&str, Setter)] = &[
    ("brickrootpaths", set_brick_roots),
    ("volumetype", set_volume_type),
    ("namespace", set_namespace),
    ("selector", set_selector),
];

fn set_brick_roots(config: &mut ProvisionerConfig, value: &str) -> Result<()> {
    config.brick_roots = parse_brick_roots(value)?;
    Ok(())
}

fn set_volume_type(config: &mut ProvisionerConfig, value: &str) -> Result<()> {
    config.volume_type = value.split_whitespace().collect::<Vec<_>>().join(" ");
    Ok(())
}

fn set_namespace(config: &mut ProvisionerConfig, value: &str) -> Result<()> {
    let value = value.trim();
    if !value.is_empty() {
        config.namespace = value.to_string();
    }
    Ok(())
}

fn set_selector(config: &mut ProvisionerConfig, value: &str) -> Result<()> {
    let value = value.trim();
    if !value.is_empty() {
        config.label_selector = value.to_string();
    }
    Ok(())
}

// =============================================================================
// Config Resolver
// =============================================================================

/// Resolves storage class parameters into a [`ProvisionerConfig`]
pub struct ConfigResolver;

impl ConfigResolver {
    /// Build and validate a config from raw parameters
    ///
    /// Keys are visited in map order, so two keys differing only by case
    /// resolve the same way on every call.
    pub fn resolve(params: &BTreeMap<String, String>) -> Result<ProvisionerConfig> {
        let mut config = ProvisionerConfig {
            brick_roots: Vec::new(),
            volume_type: String::new(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            label_selector: DEFAULT_LABEL_SELECTOR.to_string(),
        };

        for (key, value) in params {
            let key = key.to_lowercase();
            if let Some((_, setter)) = OPTIONS.iter().find(|(name, _)| *name == key) {
                setter(&mut config, value)?;
            }
        }

        validate(&config)?;
        Ok(config)
    }
}

/// Only the brick list is checked; new options need their own rule here
fn validate(config: &ProvisionerConfig) -> Result<()> {
    if config.brick_roots.is_empty() {
        return Err(Error::InvalidParameter(
            "brickRootPaths are not specified".into(),
        ));
    }
    Ok(())
}

/// Parse `host:/path, /path, ...` into brick roots, skipping empty entries
fn parse_brick_roots(value: &str) -> Result<Vec<BrickRoot>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_brick_root)
        .collect()
}

fn parse_brick_root(entry: &str) -> Result<BrickRoot> {
    let (host, path) = match entry.split_once(':') {
        Some((host, path)) => (host.trim(), path.trim()),
        None => (DEFAULT_BRICK_HOST, entry),
    };

    if host.is_empty() {
        return Err(Error::InvalidParameter(format!(
            "brick root '{}' has an empty host",
            entry
        )));
    }
    if !path.starts_with('/') {
        return Err(Error::InvalidParameter(format!(
            "brick root '{}' needs an absolute path",
            entry
        )));
    }

    Ok(BrickRoot::new(host, PathBuf::from(path)))
}
