use crate::config::{Config, ServiceConfig, SupervisorSettings};
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Validates a single service configuration
pub fn validate_service_config(name: &str, config: &ServiceConfig) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::ConfigInvalid("Service name must not be empty".to_string()));
    }

    if config.command.trim().is_empty() {
        return Err(Error::ConfigInvalid(format!("Service '{}' has empty command", name)));
    }

    if let Some(stop) = &config.stop_command {
        if stop.contains('\n') {
            return Err(Error::ConfigInvalid(format!(
                "Service '{}' stop command must be a single line",
                name
            )));
        }
    }

    Ok(())
}

/// Validates a map of service configurations
pub fn validate_service_configs(configs: &HashMap<String, ServiceConfig>) -> Result<()> {
    for (name, config) in configs {
        validate_service_config(name, config)?;
    }

    Ok(())
}

/// Validates supervisor timing and threshold settings
pub fn validate_settings(settings: &SupervisorSettings) -> Result<()> {
    if settings.max_restarts == 0 {
        return Err(Error::ConfigInvalid("maxRestarts must be at least 1".to_string()));
    }

    let periods = [
        ("restartWindowSecs", settings.restart_window_secs),
        ("checkIntervalSecs", settings.check_interval_secs),
        ("errorBackoffSecs", settings.error_backoff_secs),
        ("stopGracePeriodSecs", settings.stop_grace_period_secs),
        ("healthReportIntervalSecs", settings.health_report_interval_secs),
    ];
    for (field, value) in periods {
        if value == 0 {
            return Err(Error::ConfigInvalid(format!("{} must be greater than zero", field)));
        }
    }

    let pct = settings.resource_warning_percent;
    if !(pct > 0.0 && pct <= 100.0) {
        return Err(Error::ConfigInvalid(format!(
            "resourceWarningPercent must be in (0, 100], got {}",
            pct
        )));
    }

    Ok(())
}

/// Full configuration validation
pub fn validate_config(config: &Config) -> Result<()> {
    validate_settings(&config.supervisor)?;
    validate_service_configs(&config.services)?;

    Ok(())
}
