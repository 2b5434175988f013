//! Gateway configuration.

use anyhow::{Context, Result};
use uuid::Uuid;

/// Gateway runtime configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Stable gateway identifier; generated when absent
    pub instance_id: Option<Uuid>,

    /// Name of the built-in gateway provider
    pub provider_name: String,

    /// Version reported by the built-in system service
    pub version: f64,

    /// Capacity of the command channel feeding the writer loop
    pub command_capacity: usize,

    /// Capacity of the broadcast channel fanning out notifications
    pub event_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            instance_id: None,
            provider_name: "gateway".to_string(),
            version: 0.1,
            command_capacity: 256,
            event_capacity: 1024,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TWIN_NEXUS_INSTANCE_ID`: Gateway UUID
    /// - `TWIN_NEXUS_PROVIDER_NAME`: Name of the built-in provider
    /// - `TWIN_NEXUS_COMMAND_CAPACITY`: Command channel capacity
    /// - `TWIN_NEXUS_EVENT_CAPACITY`: Event channel capacity
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set but unparsable.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(id) = std::env::var("TWIN_NEXUS_INSTANCE_ID") {
            config.instance_id =
                Some(Uuid::parse_str(&id).context("Invalid TWIN_NEXUS_INSTANCE_ID")?);
        }

        if let Ok(name) = std::env::var("TWIN_NEXUS_PROVIDER_NAME") {
            config.provider_name = name;
        }

        if let Ok(capacity) = std::env::var("TWIN_NEXUS_COMMAND_CAPACITY") {
            config.command_capacity = capacity
                .parse()
                .context("Invalid TWIN_NEXUS_COMMAND_CAPACITY")?;
        }

        if let Ok(capacity) = std::env::var("TWIN_NEXUS_EVENT_CAPACITY") {
            config.event_capacity = capacity
                .parse()
                .context("Invalid TWIN_NEXUS_EVENT_CAPACITY")?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = GatewayConfig::default();
        assert_eq!(config.provider_name, "gateway");
        assert!(config.command_capacity > 0);
        assert!(config.event_capacity > 0);
    }
}
