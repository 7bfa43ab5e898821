// Eureka-compatible self registration and heartbeating
use async_trait::async_trait;
use followgraph_core::ShutdownSignal;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry answered {status} for {url}")]
    Status { status: u16, url: String },

    #[error("instance is not registered")]
    NotRegistered,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Registry root, e.g. `http://localhost:8761/eureka`
    pub base_url: String,
    pub app: String,
    /// Defaults to `host_name`
    pub instance_id: Option<String>,
    pub host_name: String,
    pub ip_addr: String,
    pub port: u16,
    pub vip_address: String,
    pub renewal_interval: Duration,
    pub lease_duration: Duration,
    pub request_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8761/eureka".to_string(),
            app: "FOLLOWER-SERVICE".to_string(),
            instance_id: None,
            host_name: "localhost".to_string(),
            ip_addr: "127.0.0.1".to_string(),
            port: 8082,
            vip_address: "follower-service".to_string(),
            renewal_interval: Duration::from_secs(30),
            lease_duration: Duration::from_secs(90),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl RegistryConfig {
    pub fn instance_id(&self) -> &str {
        self.instance_id.as_deref().unwrap_or(&self.host_name)
    }

    fn apps_url(&self) -> String {
        format!("{}/apps/{}", self.base_url.trim_end_matches('/'), self.app)
    }

    fn instance_url(&self) -> String {
        format!("{}/{}", self.apps_url(), self.instance_id())
    }
}

// Registry wire document

#[derive(Serialize)]
struct RegistrationDocument<'a> {
    instance: InstanceInfo<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceInfo<'a> {
    instance_id: &'a str,
    host_name: &'a str,
    app: &'a str,
    ip_addr: &'a str,
    status: &'static str,
    port: PortInfo,
    secure_port: PortInfo,
    vip_address: &'a str,
    secure_vip_address: &'a str,
    home_page_url: String,
    status_page_url: String,
    health_check_url: String,
    data_center_info: DataCenterInfo,
    lease_info: LeaseInfo,
    last_dirty_timestamp: String,
}

#[derive(Serialize)]
struct PortInfo {
    #[serde(rename = "$")]
    port: u16,
    #[serde(rename = "@enabled")]
    enabled: &'static str,
}

#[derive(Serialize)]
struct DataCenterInfo {
    #[serde(rename = "@class")]
    class: &'static str,
    name: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LeaseInfo {
    renewal_interval_in_secs: u64,
    duration_in_secs: u64,
}

fn registration_document(config: &RegistryConfig) -> RegistrationDocument<'_> {
    let home = format!("http://{}:{}", config.host_name, config.port);
    RegistrationDocument {
        instance: InstanceInfo {
            instance_id: config.instance_id(),
            host_name: &config.host_name,
            app: &config.app,
            ip_addr: &config.ip_addr,
            status: "UP",
            port: PortInfo { port: config.port, enabled: "true" },
            secure_port: PortInfo { port: 443, enabled: "false" },
            vip_address: &config.vip_address,
            secure_vip_address: &config.vip_address,
            status_page_url: format!("{home}/health"),
            health_check_url: format!("{home}/health"),
            home_page_url: format!("{home}/"),
            data_center_info: DataCenterInfo {
                class: "com.netflix.appinfo.InstanceInfo$DefaultDataCenterInfo",
                name: "MyOwn",
            },
            lease_info: LeaseInfo {
                renewal_interval_in_secs: config.renewal_interval.as_secs(),
                duration_in_secs: config.lease_duration.as_secs(),
            },
            last_dirty_timestamp: chrono::Utc::now().timestamp_millis().to_string(),
        },
    }
}

/// Announces this process to a discovery registry.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn register(&self) -> Result<(), DiscoveryError>;
    async fn heartbeat(&self) -> Result<(), DiscoveryError>;
    async fn deregister(&self) -> Result<(), DiscoveryError>;
}

pub struct EurekaClient {
    http: reqwest::Client,
    config: RegistryConfig,
}

impl EurekaClient {
    pub fn new(config: RegistryConfig) -> Result<Self, DiscoveryError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn check(response: reqwest::Response) -> Result<(), DiscoveryError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DiscoveryError::NotRegistered);
        }
        if !status.is_success() {
            return Err(DiscoveryError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Registry for EurekaClient {
    async fn register(&self) -> Result<(), DiscoveryError> {
        let response = self
            .http
            .post(self.config.apps_url())
            .json(&registration_document(&self.config))
            .send()
            .await?;
        Self::check(response)?;
        info!(app = %self.config.app, instance = %self.config.instance_id(), "registered with discovery registry");
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), DiscoveryError> {
        let response = self.http.put(self.config.instance_url()).send().await?;
        Self::check(response)?;
        debug!(instance = %self.config.instance_id(), "heartbeat sent");
        Ok(())
    }

    async fn deregister(&self) -> Result<(), DiscoveryError> {
        let response = self.http.delete(self.config.instance_url()).send().await?;
        Self::check(response)?;
        info!(instance = %self.config.instance_id(), "deregistered from discovery registry");
        Ok(())
    }
}

/// Heartbeat every `interval` until shutdown, then deregister.
///
/// A failed heartbeat triggers one re-registration attempt; failures are
/// logged and the loop carries on.
pub async fn run_heartbeat<R: Registry + ?Sized>(
    registry: &R,
    interval: Duration,
    mut shutdown: ShutdownSignal,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if let Err(e) = registry.heartbeat().await {
            warn!(error = %e, "heartbeat failed, re-registering");
            if let Err(e) = registry.register().await {
                warn!(error = %e, "re-registration failed");
            }
        }
    }

    if let Err(e) = registry.deregister().await {
        warn!(error = %e, "deregistration failed");
    }
}
