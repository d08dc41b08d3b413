//! Service-level properties: analytics logging, metrics and CORS

use queuestack_core::QueueError;
use serde::{Deserialize, Serialize};

/// Most CORS rules a service may hold
pub const MAX_CORS_RULES: usize = 5;

/// Longest retention a policy may ask for, in days
pub const MAX_RETENTION_DAYS: u32 = 365;

const ANALYTICS_VERSION: &str = "1.0";

const CORS_METHODS: &[&str] = &["DELETE", "GET", "HEAD", "MERGE", "POST", "OPTIONS", "PUT"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub enabled: bool,
    pub days: Option<u32>,
}

impl RetentionPolicy {
    pub fn days(days: u32) -> Self {
        Self {
            enabled: true,
            days: Some(days),
        }
    }

    fn validate(&self) -> Result<(), QueueError> {
        match (self.enabled, self.days) {
            (true, Some(days)) if (1..=MAX_RETENTION_DAYS).contains(&days) => Ok(()),
            (true, days) => Err(QueueError::invalid_argument(format!(
                "retention days must be between 1 and {}, got {:?}",
                MAX_RETENTION_DAYS, days
            ))),
            (false, _) => Ok(()),
        }
    }
}

/// Which requests are written to the analytics log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Logging {
    pub version: String,
    pub delete: bool,
    pub read: bool,
    pub write: bool,
    pub retention_policy: RetentionPolicy,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            version: ANALYTICS_VERSION.to_string(),
            delete: false,
            read: false,
            write: false,
            retention_policy: RetentionPolicy::default(),
        }
    }
}

/// Aggregated request metrics, per hour or per minute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub version: String,
    pub enabled: bool,
    /// Whether per-API statistics are collected. Required when enabled.
    pub include_apis: Option<bool>,
    pub retention_policy: RetentionPolicy,
}

impl Metrics {
    pub fn enabled(include_apis: bool) -> Self {
        Self {
            enabled: true,
            include_apis: Some(include_apis),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), QueueError> {
        if self.enabled && self.include_apis.is_none() {
            return Err(QueueError::invalid_argument(
                "include_apis must be set when metrics are enabled",
            ));
        }
        self.retention_policy.validate()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            version: ANALYTICS_VERSION.to_string(),
            enabled: false,
            include_apis: None,
            retention_policy: RetentionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsRule {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub max_age_in_seconds: u32,
}

impl CorsRule {
    pub fn new<O, M>(allowed_origins: O, allowed_methods: M) -> Self
    where
        O: IntoIterator,
        O::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Self {
            allowed_origins: allowed_origins.into_iter().map(Into::into).collect(),
            allowed_methods: allowed_methods.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), QueueError> {
        if self.allowed_origins.is_empty() || self.allowed_methods.is_empty() {
            return Err(QueueError::invalid_argument(
                "CORS rules need at least one allowed origin and method",
            ));
        }
        if let Some(method) = self
            .allowed_methods
            .iter()
            .find(|m| !CORS_METHODS.contains(&m.to_uppercase().as_str()))
        {
            return Err(QueueError::invalid_argument(format!(
                "unsupported CORS method {}",
                method
            )));
        }
        Ok(())
    }
}

/// Properties of the queue service as a whole
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProperties {
    pub logging: Logging,
    pub hour_metrics: Metrics,
    pub minute_metrics: Metrics,
    pub cors: Vec<CorsRule>,
}

/// A partial update. Omitted fields keep their stored value; present fields
/// replace it wholesale, so `cors: Some(vec![])` clears every rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePropertiesUpdate {
    pub logging: Option<Logging>,
    pub hour_metrics: Option<Metrics>,
    pub minute_metrics: Option<Metrics>,
    pub cors: Option<Vec<CorsRule>>,
}

impl ServicePropertiesUpdate {
    pub fn is_empty(&self) -> bool {
        self.logging.is_none()
            && self.hour_metrics.is_none()
            && self.minute_metrics.is_none()
            && self.cors.is_none()
    }

    fn validate(&self) -> Result<(), QueueError> {
        if let Some(logging) = &self.logging {
            logging.retention_policy.validate()?;
        }
        for metrics in [&self.hour_metrics, &self.minute_metrics].into_iter().flatten() {
            metrics.validate()?;
        }
        if let Some(cors) = &self.cors {
            if cors.len() > MAX_CORS_RULES {
                return Err(QueueError::invalid_argument(format!(
                    "at most {} CORS rules are allowed, got {}",
                    MAX_CORS_RULES,
                    cors.len()
                )));
            }
            cors.iter().try_for_each(CorsRule::validate)?;
        }
        Ok(())
    }
}

impl ServiceProperties {
    /// Apply `update`, leaving `self` untouched if any present field is invalid
    pub fn apply(&mut self, update: ServicePropertiesUpdate) -> Result<(), QueueError> {
        if update.is_empty() {
            return Err(QueueError::invalid_argument(
                "at least one service property must be set",
            ));
        }
        update.validate()?;

        if let Some(logging) = update.logging {
            self.logging = logging;
        }
        if let Some(metrics) = update.hour_metrics {
            self.hour_metrics = metrics;
        }
        if let Some(metrics) = update.minute_metrics {
            self.minute_metrics = metrics;
        }
        if let Some(cors) = update.cors {
            self.cors = cors;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic() -> ServicePropertiesUpdate {
        ServicePropertiesUpdate {
            logging: Some(Logging {
                delete: true,
                ..Logging::default()
            }),
            hour_metrics: Some(Metrics::enabled(true)),
            minute_metrics: Some(Metrics::enabled(false)),
            cors: Some(vec![CorsRule::new(["*"], ["GET"])]),
        }
    }

    #[test]
    fn test_apply_sets_every_present_field() {
        let mut props = ServiceProperties::default();
        props.apply(basic()).unwrap();

        assert!(props.logging.delete);
        assert_eq!(props.hour_metrics.include_apis, Some(true));
        assert_eq!(props.minute_metrics.include_apis, Some(false));
        assert_eq!(props.cors.len(), 1);
    }

    #[test]
    fn test_omitted_fields_are_preserved_and_empty_cors_clears() {
        let mut props = ServiceProperties::default();
        props.apply(basic()).unwrap();
        let before = props.clone();

        props
            .apply(ServicePropertiesUpdate {
                cors: Some(vec![]),
                ..Default::default()
            })
            .unwrap();

        assert!(props.cors.is_empty());
        assert_eq!(props.logging, before.logging);
        assert_eq!(props.hour_metrics, before.hour_metrics);
    }

    #[test]
    fn test_invalid_update_changes_nothing() {
        let mut props = ServiceProperties::default();
        let update = ServicePropertiesUpdate {
            logging: Some(Logging {
                read: true,
                ..Logging::default()
            }),
            cors: Some(vec![CorsRule::new(["*"], ["GET"]); 6]),
            ..Default::default()
        };

        assert!(props.apply(update).is_err());
        assert_eq!(props, ServiceProperties::default());
    }

    #[test]
    fn test_validation_rules() {
        let mut props = ServiceProperties::default();

        let metrics_without_apis = ServicePropertiesUpdate {
            hour_metrics: Some(Metrics {
                enabled: true,
                ..Metrics::default()
            }),
            ..Default::default()
        };
        assert!(props.apply(metrics_without_apis).is_err());

        let bad_method = ServicePropertiesUpdate {
            cors: Some(vec![CorsRule::new(["*"], ["FETCH"])]),
            ..Default::default()
        };
        assert!(props.apply(bad_method).is_err());

        let bad_retention = ServicePropertiesUpdate {
            logging: Some(Logging {
                retention_policy: RetentionPolicy::days(0),
                ..Logging::default()
            }),
            ..Default::default()
        };
        assert!(props.apply(bad_retention).is_err());

        assert!(props.apply(ServicePropertiesUpdate::default()).is_err());
    }

    #[test]
    fn test_properties_serialize() {
        let mut props = ServiceProperties::default();
        props.apply(basic()).unwrap();

        let json = serde_json::to_value(&props).unwrap();
        assert_eq!(json["logging"]["version"], "1.0");
        assert_eq!(json["cors"][0]["allowed_methods"][0], "GET");
    }
}
