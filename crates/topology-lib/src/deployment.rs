//! Deployment units: immutable workload templates
//!
//! A deployment unit describes what to run: resource limits, runtime
//! platform, container image, log binding, and exposed ports. Units are
//! immutable once built; changing any field means building a new unit
//! (a new revision of the family) and issuing a new deployment.

use crate::error::{ProvisionError, Result};
use crate::models::{CpuArchitecture, LogConfig, OsFamily, PortMapping, Protocol, RuntimePlatform};

/// Supported memory sizes (MiB) for each cpu-unit tier.
///
/// Outside these pairings the orchestrator cannot place the workload,
/// so they are rejected before anything is provisioned.
const CPU_MEMORY_TABLE: &[(u32, u32, u32)] = &[
    // (cpu_units, min_memory_mib, max_memory_mib)
    (256, 512, 2048),
    (512, 1024, 4096),
    (1024, 2048, 8192),
    (2048, 4096, 16384),
    (4096, 8192, 30720),
];

/// Check that a cpu/memory pairing is placeable.
pub fn validate_cpu_memory(cpu_units: u32, memory_mib: u32) -> Result<()> {
    let (_, min, max) = CPU_MEMORY_TABLE
        .iter()
        .find(|(cpu, _, _)| *cpu == cpu_units)
        .ok_or_else(|| {
            ProvisionError::config(format!("unsupported cpu_units value {}", cpu_units))
        })?;

    let valid = if cpu_units == 256 {
        // the smallest tier only supports three discrete sizes
        matches!(memory_mib, 512 | 1024 | 2048)
    } else {
        memory_mib >= *min && memory_mib <= *max && memory_mib % 1024 == 0
    };

    if !valid {
        return Err(ProvisionError::config(format!(
            "memory {} MiB is not supported with {} cpu units (expected {}..={} MiB)",
            memory_mib, cpu_units, min, max
        )));
    }
    Ok(())
}

/// An immutable workload template. Construct through
/// [`DeploymentUnitBuilder`].
#[derive(Debug, Clone)]
pub struct DeploymentUnit {
    family: String,
    revision: u32,
    cpu_units: u32,
    memory_mib: u32,
    platform: RuntimePlatform,
    image: String,
    image_digest: Option<String>,
    log: LogConfig,
    ports: Vec<PortMapping>,
}

impl DeploymentUnit {
    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// `family:revision`, the identifier a deployment refers to.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.family, self.revision)
    }

    pub fn cpu_units(&self) -> u32 {
        self.cpu_units
    }

    pub fn memory_mib(&self) -> u32 {
        self.memory_mib
    }

    pub fn platform(&self) -> RuntimePlatform {
        self.platform
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Digest recorded when the image reference was resolved through
    /// the image registry, if provisioning has happened.
    pub fn image_digest(&self) -> Option<&str> {
        self.image_digest.as_deref()
    }

    pub fn log(&self) -> &LogConfig {
        &self.log
    }

    pub fn ports(&self) -> &[PortMapping] {
        &self.ports
    }

    /// The first declared port mapping; every unit has at least one.
    pub fn primary_port(&self) -> PortMapping {
        self.ports[0]
    }

    pub fn exposes_port(&self, container_port: u16) -> bool {
        self.ports.iter().any(|p| p.container_port == container_port)
    }
}

/// Builder for [`DeploymentUnit`].
pub struct DeploymentUnitBuilder {
    family: String,
    revision: u32,
    cpu_units: u32,
    memory_mib: u32,
    platform: RuntimePlatform,
    image: Option<String>,
    image_digest: Option<String>,
    log: LogConfig,
    ports: Vec<PortMapping>,
}

impl DeploymentUnitBuilder {
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            revision: 1,
            cpu_units: 256,
            memory_mib: 512,
            platform: RuntimePlatform::default(),
            image: None,
            image_digest: None,
            log: LogConfig::default(),
            ports: Vec::new(),
        }
    }

    pub fn revision(mut self, revision: u32) -> Self {
        self.revision = revision;
        self
    }

    pub fn cpu_units(mut self, cpu_units: u32) -> Self {
        self.cpu_units = cpu_units;
        self
    }

    pub fn memory_mib(mut self, memory_mib: u32) -> Self {
        self.memory_mib = memory_mib;
        self
    }

    pub fn architecture(mut self, architecture: CpuArchitecture) -> Self {
        self.platform.architecture = architecture;
        self
    }

    pub fn os_family(mut self, os_family: OsFamily) -> Self {
        self.platform.os_family = os_family;
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn image_digest(mut self, digest: impl Into<String>) -> Self {
        self.image_digest = Some(digest.into());
        self
    }

    pub fn log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    pub fn port(mut self, container_port: u16, protocol: Protocol) -> Self {
        self.ports.push(PortMapping {
            container_port,
            protocol,
        });
        self
    }

    pub fn ports(mut self, ports: Vec<PortMapping>) -> Self {
        self.ports = ports;
        self
    }

    pub fn build(self) -> Result<DeploymentUnit> {
        if self.family.is_empty() {
            return Err(ProvisionError::config("deployment unit family is required"));
        }
        let image = self
            .image
            .ok_or_else(|| ProvisionError::config("container image reference is required"))?;
        if self.ports.is_empty() {
            return Err(ProvisionError::config(format!(
                "deployment unit '{}' needs at least one port mapping",
                self.family
            )));
        }
        validate_cpu_memory(self.cpu_units, self.memory_mib)?;
        if self.platform.architecture == CpuArchitecture::Arm64
            && self.platform.os_family == OsFamily::Windows
        {
            return Err(ProvisionError::config(
                "arm64 is only supported on the linux OS family",
            ));
        }

        Ok(DeploymentUnit {
            family: self.family,
            revision: self.revision,
            cpu_units: self.cpu_units,
            memory_mib: self.memory_mib,
            platform: self.platform,
            image,
            image_digest: self.image_digest,
            log: self.log,
            ports: self.ports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> DeploymentUnitBuilder {
        DeploymentUnitBuilder::new("webapp")
            .image("registry.local/webapp:1.0")
            .port(80, Protocol::Tcp)
    }

    #[test]
    fn test_build_default_unit() {
        let unit = builder().build().unwrap();
        assert_eq!(unit.family(), "webapp");
        assert_eq!(unit.revision(), 1);
        assert_eq!(unit.qualified_name(), "webapp:1");
        assert_eq!(unit.primary_port().container_port, 80);
    }

    #[test]
    fn test_cpu_memory_pairings() {
        assert!(validate_cpu_memory(256, 512).is_ok());
        assert!(validate_cpu_memory(256, 2048).is_ok());
        assert!(validate_cpu_memory(512, 3072).is_ok());
        assert!(validate_cpu_memory(1024, 8192).is_ok());

        // 256 only supports three discrete sizes
        assert!(validate_cpu_memory(256, 1536).is_err());
        // below the tier minimum
        assert!(validate_cpu_memory(512, 512).is_err());
        // not a whole GiB step
        assert!(validate_cpu_memory(1024, 2500).is_err());
        // unknown cpu tier
        assert!(validate_cpu_memory(300, 1024).is_err());
    }

    #[test]
    fn test_arm64_requires_linux() {
        let err = builder()
            .architecture(CpuArchitecture::Arm64)
            .os_family(OsFamily::Windows)
            .build()
            .unwrap_err();
        assert!(err.is_config());

        let unit = builder()
            .architecture(CpuArchitecture::Arm64)
            .build()
            .unwrap();
        assert_eq!(unit.platform().architecture, CpuArchitecture::Arm64);
    }

    #[test]
    fn test_port_mapping_required() {
        let err = DeploymentUnitBuilder::new("webapp")
            .image("registry.local/webapp:1.0")
            .build()
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_missing_image_rejected() {
        let err = DeploymentUnitBuilder::new("webapp")
            .port(80, Protocol::Tcp)
            .build()
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_revisions_are_distinct_units() {
        let v1 = builder().build().unwrap();
        let v2 = builder().revision(2).memory_mib(1024).build().unwrap();
        assert_eq!(v1.family(), v2.family());
        assert_ne!(v1.revision(), v2.revision());
        assert_eq!(v1.memory_mib(), 512);
    }
}
