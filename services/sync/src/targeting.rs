use crate::config::TargetingConfig;
use thiserror::Error;
use tracing::trace;

/// Marker in a cache identifier that routes the asset to the left-line group
pub const LEFT_LINE_MARKER: &str = "left_line_";
/// Marker in a cache identifier that routes the asset to the right-line group
pub const RIGHT_LINE_MARKER: &str = "right_line_";

/// Errors raised while resolving device targets
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TargetingError {
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Which rule selected the devices for an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRule {
    /// A device identifier was found inside the cache identifier
    ExactDevice,
    /// The cache identifier carried the left-line marker
    LeftGroup,
    /// The cache identifier carried the right-line marker
    RightGroup,
    /// Nothing matched, every known device receives the asset
    Broadcast,
}

impl TargetRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetRule::ExactDevice => "exact_device",
            TargetRule::LeftGroup => "left_group",
            TargetRule::RightGroup => "right_group",
            TargetRule::Broadcast => "broadcast",
        }
    }
}

/// Outcome of resolving one cache identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDecision {
    pub rule: TargetRule,
    /// Device identifiers in delivery order, never empty
    pub devices: Vec<String>,
}

/// Decides which devices receive an asset, based on its cache identifier.
///
/// Rules are applied in precedence order and the first match wins:
/// - a known device identifier appearing as a substring of the cache
///   identifier selects that single device (first in directory order)
/// - the left/right line markers select the configured device group
/// - otherwise the asset is broadcast to every known device
///
/// The same resolver is used for background publishing and tag registration
/// so both steps always agree on the device set.
#[derive(Debug, Clone, Default)]
pub struct DeviceTargeting {
    config: TargetingConfig,
}

impl DeviceTargeting {
    pub fn new(config: TargetingConfig) -> Self {
        Self { config }
    }

    /// Resolve the ordered device set for `cache_id`
    pub fn resolve<S: AsRef<str>>(
        &self,
        cache_id: &str,
        known_devices: &[S],
    ) -> Result<TargetDecision, TargetingError> {
        if known_devices.is_empty() {
            return Err(TargetingError::Configuration(format!(
                "cannot resolve targets for '{}' against an empty device directory",
                cache_id
            )));
        }

        // A filename naming two devices still resolves to one; the earliest
        // directory entry wins, not the earliest position in the name.
        if let Some(device) = known_devices
            .iter()
            .map(AsRef::as_ref)
            .find(|device| !device.is_empty() && cache_id.contains(device))
        {
            trace!(cache_id, device, "Matched device identifier in cache id");
            return Ok(TargetDecision {
                rule: TargetRule::ExactDevice,
                devices: vec![device.to_string()],
            });
        }

        if cache_id.contains(LEFT_LINE_MARKER) && !self.config.left_group.is_empty() {
            return Ok(TargetDecision {
                rule: TargetRule::LeftGroup,
                devices: self.config.left_group.clone(),
            });
        }

        if cache_id.contains(RIGHT_LINE_MARKER) && !self.config.right_group.is_empty() {
            return Ok(TargetDecision {
                rule: TargetRule::RightGroup,
                devices: self.config.right_group.clone(),
            });
        }

        Ok(TargetDecision {
            rule: TargetRule::Broadcast,
            devices: known_devices
                .iter()
                .map(|device| device.as_ref().to_string())
                .collect(),
        })
    }
}

/// Builder for creating DeviceTargeting with custom groups
pub struct DeviceTargetingBuilder {
    config: TargetingConfig,
}

impl DeviceTargetingBuilder {
    pub fn new() -> Self {
        Self {
            config: TargetingConfig::default(),
        }
    }

    pub fn left_group<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.left_group = devices.into_iter().map(Into::into).collect();
        self
    }

    pub fn right_group<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.right_group = devices.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> DeviceTargeting {
        DeviceTargeting::new(self.config)
    }
}

impl Default for DeviceTargetingBuilder {
    fn default() -> Self {
        Self::new()
    }
}
