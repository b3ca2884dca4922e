use envconfig::Envconfig;
use std::time::Duration;

#[derive(Envconfig, Clone, Debug)]
pub struct FleetConfig {
    #[envconfig(from = "OPRC_FLEET_PROFILE", default = "dev")]
    pub profile: String,

    /// Namespace to watch; empty watches all namespaces
    #[envconfig(from = "OPRC_FLEET_K8S_NAMESPACE", default = "default")]
    pub k8s_namespace: String,

    /// Upper bound of resources reconciled at the same time
    /// Env: OPRC_FLEET_CONCURRENCY
    #[envconfig(from = "OPRC_FLEET_CONCURRENCY", default = "8")]
    pub concurrency: u16,

    #[envconfig(nested)]
    pub requeue: RequeueConfig,

    #[envconfig(nested)]
    pub retry: RetryConfig,

    #[envconfig(nested)]
    pub features: FeaturesConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct RequeueConfig {
    /// Periodic resync after a clean pass
    #[envconfig(from = "OPRC_FLEET_REQUEUE_SECS", default = "60")]
    pub ok_secs: u64,
    #[envconfig(from = "OPRC_FLEET_ERROR_REQUEUE_SECS", default = "15")]
    pub error_secs: u64,
    /// Configuration errors need a spec edit; poll them slowly
    #[envconfig(from = "OPRC_FLEET_CONFIG_ERROR_REQUEUE_SECS", default = "300")]
    pub config_error_secs: u64,
    /// Poll interval while the provider tears a group down
    #[envconfig(from = "OPRC_FLEET_DELETE_POLL_SECS", default = "10")]
    pub delete_poll_secs: u64,
}

#[derive(Envconfig, Clone, Debug)]
pub struct RetryConfig {
    #[envconfig(from = "OPRC_FLEET_RETRY_MAX_ATTEMPTS", default = "5")]
    pub max_attempts: u32,
    #[envconfig(from = "OPRC_FLEET_RETRY_INITIAL_MS", default = "250")]
    pub initial_ms: u64,
    #[envconfig(from = "OPRC_FLEET_RETRY_FACTOR", default = "2.0")]
    pub factor: f64,
    #[envconfig(from = "OPRC_FLEET_RETRY_JITTER", default = "0.2")]
    pub jitter: f64,
    #[envconfig(from = "OPRC_FLEET_RETRY_MAX_DELAY_MS", default = "20000")]
    pub max_delay_ms: u64,
}

#[derive(Envconfig, Clone, Debug, Default)]
pub struct FeaturesConfig {
    /// If Some, env explicitly set; otherwise, profile defaults apply
    #[envconfig(from = "OPRC_FLEET_FEATURES_TAG_UNMANAGED_NETWORK")]
    pub tag_unmanaged_network: Option<bool>,
    #[envconfig(from = "OPRC_FLEET_FEATURES_CLUSTER_CONTROLLER")]
    pub cluster_controller: Option<bool>,
}

impl FleetConfig {
    /// Apply profile → defaults mapping, while respecting explicit env overrides.
    ///
    /// Rules:
    /// - dev: tag_unmanaged_network=false, cluster_controller=true
    /// - full: tag_unmanaged_network=true, cluster_controller=true
    pub fn apply_profile_defaults(mut self) -> Self {
        let (def_tag_unmanaged, def_cluster) = match self.profile.as_str() {
            "full" | "prod" | "production" => (true, true),
            _ /* dev */ => (false, true),
        };

        if self.features.tag_unmanaged_network.is_none() {
            self.features.tag_unmanaged_network = Some(def_tag_unmanaged);
        }
        if self.features.cluster_controller.is_none() {
            self.features.cluster_controller = Some(def_cluster);
        }

        self
    }

    pub fn tag_unmanaged_network(&self) -> bool {
        self.features.tag_unmanaged_network.unwrap_or(false)
    }
}

impl RequeueConfig {
    pub fn ok(&self) -> Duration {
        Duration::from_secs(self.ok_secs)
    }

    pub fn error(&self) -> Duration {
        Duration::from_secs(self.error_secs)
    }

    pub fn config_error(&self) -> Duration {
        Duration::from_secs(self.config_error_secs)
    }

    pub fn delete_poll(&self) -> Duration {
        Duration::from_secs(self.delete_poll_secs)
    }
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            ok_secs: 60,
            error_secs: 15,
            config_error_secs: 300,
            delete_poll_secs: 10,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_ms: 250,
            factor: 2.0,
            jitter: 0.2,
            max_delay_ms: 20_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::retry::Backoff;
    use std::collections::HashMap;

    fn base(profile: &str) -> FleetConfig {
        FleetConfig {
            profile: profile.to_string(),
            k8s_namespace: "default".into(),
            concurrency: 8,
            requeue: RequeueConfig::default(),
            retry: RetryConfig::default(),
            features: FeaturesConfig::default(),
        }
    }

    #[test]
    fn profile_defaults_dev() {
        let cfg = base("dev").apply_profile_defaults();
        assert_eq!(cfg.features.tag_unmanaged_network, Some(false));
        assert_eq!(cfg.features.cluster_controller, Some(true));
    }

    #[test]
    fn profile_defaults_full() {
        for p in ["full", "prod", "production"] {
            let cfg = base(p).apply_profile_defaults();
            assert_eq!(cfg.features.tag_unmanaged_network, Some(true));
            assert_eq!(cfg.features.cluster_controller, Some(true));
        }
    }

    #[test]
    fn profile_defaults_respect_env_overrides() {
        let mut cfg = base("full");
        cfg.features.cluster_controller = Some(false);
        let cfg = cfg.apply_profile_defaults();
        assert_eq!(cfg.features.cluster_controller, Some(false));
        assert_eq!(cfg.features.tag_unmanaged_network, Some(true));
    }

    #[test]
    fn loads_defaults_from_empty_env() {
        let cfg = FleetConfig::init_from_hashmap(&HashMap::new())
            .unwrap()
            .apply_profile_defaults();
        assert_eq!(cfg.profile, "dev");
        assert_eq!(cfg.concurrency, 8);
        assert_eq!(cfg.requeue.config_error_secs, 300);
        assert_eq!(cfg.requeue.delete_poll_secs, 10);
        assert_eq!(cfg.retry.max_attempts, 5);
        assert!(!cfg.tag_unmanaged_network());
    }

    #[test]
    fn retry_config_maps_to_backoff() {
        let env = HashMap::from([
            ("OPRC_FLEET_RETRY_MAX_ATTEMPTS".to_string(), "3".to_string()),
            ("OPRC_FLEET_RETRY_INITIAL_MS".to_string(), "100".to_string()),
            ("OPRC_FLEET_RETRY_JITTER".to_string(), "0".to_string()),
        ]);
        let cfg = FleetConfig::init_from_hashmap(&env).unwrap();
        let backoff = Backoff::from(&cfg.retry);
        assert_eq!(backoff.max_attempts, 3);
        assert_eq!(backoff.initial, Duration::from_millis(100));
        assert_eq!(backoff.jitter, 0.0);
    }
}
