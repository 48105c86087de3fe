//! Device-class registry
//!
//! A device class binds a caller-visible name to a volume group (and
//! optionally a thin pool) plus creation defaults. The registry is built
//! once from configuration and immutable afterwards.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashSet;

/// Whether a class allocates directly in the VG or from a thin pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClassKind {
    #[default]
    Thick,
    Thin,
}

/// Thin-pool binding of a thin device class.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ThinPoolConfig {
    pub name: String,
    /// Multiplier applied to the pool's physical size when computing the
    /// advertised logical capacity.
    #[serde(default = "default_overprovision_ratio")]
    pub overprovision_ratio: f64,
}

fn default_overprovision_ratio() -> f64 {
    1.0
}

/// One named device class as it appears in the daemon configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceClass {
    pub name: String,
    pub volume_group: String,
    #[serde(default)]
    pub default: bool,
    /// Gibibytes subtracted from the reported free space of the VG.
    #[serde(default)]
    pub spare_gb: u64,
    #[serde(default, rename = "type")]
    pub kind: DeviceClassKind,
    #[serde(default)]
    pub thin_pool: Option<ThinPoolConfig>,
    /// Number of stripes; 0 leaves striping to the tool default.
    #[serde(default)]
    pub stripe: u32,
    /// Stripe size argument, e.g. `"64k"`. Also the allocation rounding
    /// unit for requests in this class.
    #[serde(default)]
    pub stripe_size: String,
    /// Extra arguments appended to every `lvcreate` in this class.
    #[serde(default)]
    pub lvcreate_options: Vec<String>,
}

impl DeviceClass {
    /// Bytes held back from the reported free space.
    pub fn spare_bytes(&self) -> u64 {
        self.spare_gb << 30
    }
}

#[cfg(test)]
impl DeviceClass {
    pub(crate) fn test_thick() -> Self {
        DeviceClass {
            name: String::new(),
            volume_group: String::new(),
            default: false,
            spare_gb: 0,
            kind: DeviceClassKind::Thick,
            thin_pool: None,
            stripe: 0,
            stripe_size: String::new(),
            lvcreate_options: vec![],
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Immutable name → device class mapping with a single default.
#[derive(Debug)]
pub struct DeviceClassRegistry {
    classes: Vec<DeviceClass>,
    default_index: usize,
}

impl DeviceClassRegistry {
    /// Validate and build the registry.
    pub fn new(classes: Vec<DeviceClass>) -> Result<Self> {
        if classes.is_empty() {
            return Err(Error::Configuration(
                "at least one device class is required".into(),
            ));
        }

        let mut names = HashSet::new();
        let mut default_index = None;
        for (i, dc) in classes.iter().enumerate() {
            if dc.name.is_empty() {
                return Err(Error::Configuration("device class with empty name".into()));
            }
            if !names.insert(dc.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate device class: {}",
                    dc.name
                )));
            }
            if dc.default {
                if default_index.is_some() {
                    return Err(Error::Configuration(
                        "multiple default device classes".into(),
                    ));
                }
                default_index = Some(i);
            }
            match dc.kind {
                DeviceClassKind::Thin => {
                    let pool = dc.thin_pool.as_ref().ok_or_else(|| {
                        Error::Configuration(format!(
                            "thin device class {} requires a thin-pool",
                            dc.name
                        ))
                    })?;
                    if pool.overprovision_ratio < 1.0 {
                        return Err(Error::Configuration(format!(
                            "device class {}: overprovision-ratio must be >= 1",
                            dc.name
                        )));
                    }
                }
                DeviceClassKind::Thick => {
                    if dc.thin_pool.is_some() {
                        return Err(Error::Configuration(format!(
                            "thick device class {} must not set a thin-pool",
                            dc.name
                        )));
                    }
                }
            }
        }

        let default_index = default_index.ok_or_else(|| {
            Error::Configuration("exactly one device class must be the default".into())
        })?;

        Ok(Self {
            classes,
            default_index,
        })
    }

    /// Resolve a class by name; the empty string resolves to the default.
    pub fn resolve(&self, name: &str) -> Result<&DeviceClass> {
        if name.is_empty() {
            return Ok(self.default_class());
        }
        self.classes
            .iter()
            .find(|dc| dc.name == name)
            .ok_or_else(|| Error::NotFound(format!("device class {name}")))
    }

    pub fn default_class(&self) -> &DeviceClass {
        &self.classes[self.default_index]
    }

    pub fn list(&self) -> &[DeviceClass] {
        &self.classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thick(name: &str, vg: &str, default: bool) -> DeviceClass {
        DeviceClass {
            name: name.into(),
            volume_group: vg.into(),
            default,
            ..DeviceClass::test_thick()
        }
    }

    fn thin(name: &str, vg: &str, pool: &str, ratio: f64) -> DeviceClass {
        DeviceClass {
            kind: DeviceClassKind::Thin,
            thin_pool: Some(ThinPoolConfig {
                name: pool.into(),
                overprovision_ratio: ratio,
            }),
            ..thick(name, vg, false)
        }
    }

    #[test]
    fn test_resolve_and_default() {
        let reg = DeviceClassRegistry::new(vec![
            thick("ssd", "myvg1", true),
            thin("fast", "myvg2", "pool0", 10.0),
        ])
        .unwrap();

        assert_eq!(reg.resolve("").unwrap().name, "ssd");
        assert_eq!(reg.resolve("fast").unwrap().name, "fast");
        assert_eq!(reg.default_class().name, "ssd");
        assert_eq!(reg.list().len(), 2);
        assert!(matches!(reg.resolve("missing"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_rejects_duplicates() {
        let err =
            DeviceClassRegistry::new(vec![thick("ssd", "a", true), thick("ssd", "b", false)])
                .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_rejects_multiple_defaults() {
        let err =
            DeviceClassRegistry::new(vec![thick("a", "vg", true), thick("b", "vg", true)])
                .unwrap_err();
        assert!(err.to_string().contains("multiple default"));
    }

    #[test]
    fn test_requires_default() {
        let err = DeviceClassRegistry::new(vec![thick("a", "vg", false)]).unwrap_err();
        assert!(err.to_string().contains("default"));
    }

    #[test]
    fn test_thin_requires_pool() {
        let mut dc = thick("fast", "vg", true);
        dc.kind = DeviceClassKind::Thin;
        let err = DeviceClassRegistry::new(vec![dc]).unwrap_err();
        assert!(err.to_string().contains("thin-pool"));
    }

    #[test]
    fn test_rejects_empty_registry() {
        assert!(DeviceClassRegistry::new(vec![]).is_err());
    }

    #[test]
    fn test_spare_bytes() {
        let mut dc = thick("ssd", "vg", true);
        dc.spare_gb = 10;
        assert_eq!(dc.spare_bytes(), 10 << 30);
    }
}
