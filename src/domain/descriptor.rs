// Metric descriptor domain model
use std::hash::{Hash, Hasher};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DescriptorError {
    #[error("metric descriptor needs at least one metric name")]
    NoMetrics,
    #[error("scale factor must be finite, got {0}")]
    InvalidFactor(f64),
    #[error("instance filter can either include or omit instances, not both")]
    ConflictingInstanceFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Derive {
    /// Report the raw value.
    Raw,
    /// The metric is a cumulative counter; report its per-second rate.
    Rate,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum InstanceFilter {
    #[default]
    All,
    Include(Vec<String>),
    Omit(Vec<String>),
}

impl InstanceFilter {
    pub fn accepts(&self, instance: &str) -> bool {
        match self {
            InstanceFilter::All => true,
            InstanceFilter::Include(names) => names.iter().any(|n| n == instance),
            InstanceFilter::Omit(names) => !names.iter().any(|n| n == instance),
        }
    }
}

/// Identity of one summed metric stream.
#[derive(Debug, Clone)]
pub struct MetricDescriptor {
    metrics: Vec<String>,
    units: String,
    derive: Derive,
    instances: InstanceFilter,
    factor: f64,
    host: Option<String>,
}

impl MetricDescriptor {
    pub fn new(
        metrics: Vec<String>,
        units: impl Into<String>,
        derive: Derive,
        instances: Option<Vec<String>>,
        omit_instances: Option<Vec<String>>,
        factor: Option<f64>,
    ) -> Result<Self, DescriptorError> {
        if metrics.is_empty() {
            return Err(DescriptorError::NoMetrics);
        }

        let factor = factor.unwrap_or(1.0);
        if !factor.is_finite() {
            return Err(DescriptorError::InvalidFactor(factor));
        }

        let instances = match (instances, omit_instances) {
            (Some(_), Some(_)) => return Err(DescriptorError::ConflictingInstanceFilter),
            (Some(include), None) => InstanceFilter::Include(include),
            (None, Some(omit)) => InstanceFilter::Omit(omit),
            (None, None) => InstanceFilter::All,
        };

        Ok(Self {
            metrics,
            units: units.into(),
            derive,
            instances,
            factor,
            host: None,
        })
    }

    /// Same descriptor, sampled on `host`.
    pub fn on_host(&self, host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..self.clone()
        }
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn derive(&self) -> Derive {
        self.derive
    }

    pub fn instances(&self) -> &InstanceFilter {
        &self.instances
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// CPU usage in percent: millisec/sec summed over nice, user and sys.
    pub fn cpu() -> Self {
        Self {
            metrics: names(&["kernel.all.cpu.nice", "kernel.all.cpu.user", "kernel.all.cpu.sys"]),
            units: "millisec".to_string(),
            derive: Derive::Rate,
            instances: InstanceFilter::All,
            factor: 0.1,
            host: None,
        }
    }

    pub fn memory() -> Self {
        Self {
            metrics: names(&["mem.util.used"]),
            units: "byte".to_string(),
            derive: Derive::Raw,
            instances: InstanceFilter::All,
            factor: 1.0,
            host: None,
        }
    }

    pub fn network() -> Self {
        Self {
            metrics: names(&["network.interface.total.bytes"]),
            units: "byte".to_string(),
            derive: Derive::Rate,
            instances: InstanceFilter::Omit(names(&["lo"])),
            factor: 1.0,
            host: None,
        }
    }

    pub fn disk() -> Self {
        Self {
            metrics: names(&["disk.dev.total_bytes"]),
            units: "byte".to_string(),
            derive: Derive::Rate,
            instances: InstanceFilter::All,
            factor: 1.0,
            host: None,
        }
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl PartialEq for MetricDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.metrics == other.metrics
            && self.units == other.units
            && self.derive == other.derive
            && self.instances == other.instances
            && self.factor.to_bits() == other.factor.to_bits()
            && self.host == other.host
    }
}

impl Eq for MetricDescriptor {}

impl Hash for MetricDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.metrics.hash(state);
        self.units.hash(state);
        self.derive.hash(state);
        self.instances.hash(state);
        self.factor.to_bits().hash(state);
        self.host.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_rejects_malformed_descriptors() {
        let err = MetricDescriptor::new(vec![], "byte", Derive::Raw, None, None, None).unwrap_err();
        assert_eq!(err, DescriptorError::NoMetrics);

        let err = MetricDescriptor::new(names(&["a"]), "byte", Derive::Raw, None, None, Some(f64::NAN))
            .unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidFactor(f) if f.is_nan()));

        let err = MetricDescriptor::new(
            names(&["a"]),
            "byte",
            Derive::Raw,
            Some(names(&["eth0"])),
            Some(names(&["lo"])),
            None,
        )
        .unwrap_err();
        assert_eq!(err, DescriptorError::ConflictingInstanceFilter);
    }

    #[test]
    fn test_instance_filter() {
        assert!(InstanceFilter::All.accepts("lo"));
        assert!(InstanceFilter::Include(names(&["sda"])).accepts("sda"));
        assert!(!InstanceFilter::Include(names(&["sda"])).accepts("vda"));
        assert!(!InstanceFilter::Omit(names(&["lo"])).accepts("lo"));
        assert!(InstanceFilter::Omit(names(&["lo"])).accepts("eth0"));
    }

    #[test]
    fn test_identity_includes_host() {
        let mut set = HashSet::new();
        set.insert(MetricDescriptor::cpu().on_host("a"));
        set.insert(MetricDescriptor::cpu().on_host("a"));
        set.insert(MetricDescriptor::cpu().on_host("b"));
        set.insert(MetricDescriptor::memory().on_host("a"));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_builtin_descriptors() {
        let cpu = MetricDescriptor::cpu();
        assert_eq!(cpu.metrics().len(), 3);
        assert_eq!(cpu.factor(), 0.1);
        assert_eq!(cpu.derive(), Derive::Rate);

        let net = MetricDescriptor::network();
        assert_eq!(net.instances(), &InstanceFilter::Omit(names(&["lo"])));
        assert_eq!(net.host(), None);
    }
}
