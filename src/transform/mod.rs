//! Tag transformation: the policy seam between raw OSM tags and the builder.
//!
//! The builder only understands the normalized vocabulary (integer codes for
//! road class and use, `"true"`/`"false"` booleans, kph speeds). A transform
//! turns raw tag sets into that vocabulary; an empty result means the entity
//! is not routable and is dropped.

pub mod node;
pub mod way;

use anyhow::Result;

use crate::config::TagTransformConfig;

pub type Tags = Vec<(String, String)>;

/// Look up a raw tag value by key.
pub(crate) fn get<'a>(tags: &'a [(String, String)], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// The transform contract. Implementations must be referentially
/// transparent: the same tag set always yields the same result, so
/// invocations may run concurrently.
pub trait TagTransform: Send + Sync {
    fn transform_way(&self, tags: &Tags) -> Result<Tags>;
    fn transform_node(&self, tags: &Tags) -> Result<Tags>;
}

/// The built-in normalization policy.
pub struct BuiltinTransform;

impl TagTransform for BuiltinTransform {
    fn transform_way(&self, tags: &Tags) -> Result<Tags> {
        Ok(way::transform(tags))
    }

    fn transform_node(&self, tags: &Tags) -> Result<Tags> {
        Ok(node::transform(tags))
    }
}

/// Resolve the transform named by the config. Script handles are accepted as
/// opaque configuration but no script engine ships in this build, so setting
/// one is an error rather than a silent fallback.
pub fn from_config(config: &TagTransformConfig) -> Result<Box<dyn TagTransform>> {
    if config.node_script.is_some() || config.way_script.is_some() {
        anyhow::bail!("scripted tag transforms are not available in this build");
    }
    Ok(Box::new(BuiltinTransform))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_builtin_is_referentially_transparent() {
        let t = BuiltinTransform;
        let input = tags(&[("highway", "residential"), ("name", "Elm St")]);
        assert_eq!(
            t.transform_way(&input).unwrap(),
            t.transform_way(&input).unwrap()
        );
    }

    #[test]
    fn test_script_config_is_rejected() {
        let config = TagTransformConfig {
            way_script: Some("custom.lua".into()),
            ..Default::default()
        };
        assert!(from_config(&config).is_err());
    }
}
