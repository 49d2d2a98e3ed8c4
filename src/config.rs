//! Configuration management for relaylink.
//!
//! Configuration is layered from multiple sources:
//! 1. Default configuration (embedded in binary)
//! 2. System-wide configuration file (`/etc/relaylink/config.toml`)
//! 3. User-specified configuration file
//! 4. Environment variables (`RELAYLINK__SECTION__KEY`, e.g. `RELAYLINK__SERVER__PORT`)
//! 5. Command-line arguments
//!
//! Later sources override earlier ones.

use crate::discovery::{ServiceEndpoint, StaticLocator};
use crate::error::{Error, Result};
use clap::Args;
use config::builder::{ConfigBuilder, DefaultState};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line overrides shared by the commands that load configuration.
#[derive(Debug, Default, Clone, Args)]
pub struct ConfigArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "RELAYLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address the relay server binds to
    #[arg(long)]
    pub host: Option<String>,

    /// Port the relay server listens on
    #[arg(long)]
    pub port: Option<u16>,

    /// Service name registered by this link
    #[arg(long = "service-name")]
    pub service_name: Option<String>,

    /// Service version registered by this link
    #[arg(long = "service-version")]
    pub service_version: Option<String>,

    /// Built-in message processor (passthrough|fail)
    #[arg(long)]
    pub processor: Option<String>,

    /// Sidecar host
    #[arg(long = "sidecar-host")]
    pub sidecar_host: Option<String>,

    /// Sidecar port
    #[arg(long = "sidecar-port")]
    pub sidecar_port: Option<u16>,

    /// Directory for log files (logs go to stdout when unset)
    #[arg(long = "log-dir")]
    pub log_dir: Option<PathBuf>,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub link: LinkSettings,
    pub sidecar: SidecarSettings,
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Relay server listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Host advertised to the sidecar; defaults to `host`
    #[serde(default)]
    pub advertise_host: Option<String>,
}

/// Identity of the local link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_processor")]
    pub processor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarSettings {
    pub host: String,
    pub port: u16,
}

/// Outbound transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// 0 disables the per-request timeout
    #[serde(default)]
    pub request_timeout_secs: u64,
    #[serde(default = "default_relay_buffer")]
    pub relay_buffer: usize,
    /// How long closing a relay stream waits for the peer to end its receipt
    /// stream; 0 waits indefinitely
    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: 0,
            relay_buffer: default_relay_buffer(),
            receipt_timeout_secs: default_receipt_timeout(),
        }
    }
}

impl ClientSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn receipt_timeout(&self) -> Option<Duration> {
        (self.receipt_timeout_secs > 0).then(|| Duration::from_secs(self.receipt_timeout_secs))
    }
}

/// Static next-hop route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub service_name: String,
    /// Exact version or `*`
    pub service_version: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directives, e.g. `relaylink_core=debug`
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Settings {
    /// Load configuration from all sources
    pub fn load(args: &ConfigArgs) -> Result<Self> {
        let mut builder = Self::defaults()
            .add_source(config::File::with_name("/etc/relaylink/config.toml").required(false));

        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("RELAYLINK")
                .separator("__")
                .try_parsing(true),
        );

        Self::finish(builder, args)
    }

    /// Load from the embedded defaults, the `--config` file and CLI flags
    /// only, ignoring the system file and the environment
    pub fn load_local(args: &ConfigArgs) -> Result<Self> {
        let mut builder = Self::defaults();
        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }
        Self::finish(builder, args)
    }

    fn defaults() -> ConfigBuilder<DefaultState> {
        config::Config::builder().add_source(config::File::from_str(
            include_str!("../config/default.toml"),
            config::FileFormat::Toml,
        ))
    }

    fn finish(builder: ConfigBuilder<DefaultState>, args: &ConfigArgs) -> Result<Self> {
        let mut settings: Settings = builder.build()?.try_deserialize()?;
        settings.apply_args(args);
        settings.validate()?;
        Ok(settings)
    }

    fn apply_args(&mut self, args: &ConfigArgs) {
        if let Some(host) = &args.host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(name) = &args.service_name {
            self.link.name = name.clone();
        }
        if let Some(version) = &args.service_version {
            self.link.version = version.clone();
        }
        if let Some(processor) = &args.processor {
            self.link.processor = processor.clone();
        }
        if let Some(host) = &args.sidecar_host {
            self.sidecar.host = host.clone();
        }
        if let Some(port) = args.sidecar_port {
            self.sidecar.port = port;
        }
        if let Some(dir) = &args.log_dir {
            self.logging.directory = Some(dir.clone());
        }
    }

    fn validate(&self) -> Result<()> {
        if self.link.name.trim().is_empty() {
            return Err(Error::Config("link.name must not be empty".to_string()));
        }
        if self.link.version.trim().is_empty() {
            return Err(Error::Config("link.version must not be empty".to_string()));
        }
        if self.client.relay_buffer == 0 {
            return Err(Error::Config("client.relay_buffer must be positive".to_string()));
        }
        Ok(())
    }

    /// Socket address the relay server binds to
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.server.host, self.server.port).parse()?)
    }

    /// Endpoint announced to the sidecar during registration
    pub fn advertised_endpoint(&self) -> ServiceEndpoint {
        let host = self
            .server
            .advertise_host
            .clone()
            .unwrap_or_else(|| self.server.host.clone());
        ServiceEndpoint::new(host, self.server.port)
    }

    pub fn sidecar_endpoint(&self) -> ServiceEndpoint {
        ServiceEndpoint::new(self.sidecar.host.clone(), self.sidecar.port)
    }

    /// Route table with the sidecar as fallback next hop
    pub fn locator(&self) -> StaticLocator {
        StaticLocator::from_routes(&self.routes, Some(self.sidecar_endpoint()))
    }
}

fn default_processor() -> String {
    "passthrough".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_relay_buffer() -> usize {
    64
}

fn default_receipt_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = Settings::load_local(&ConfigArgs::default()).unwrap();
        assert_eq!(config.server.port, 50051);
        assert_eq!(config.link.processor, "passthrough");
        assert_eq!(config.client.connect_timeout_secs, 5);
        assert_eq!(config.client.relay_buffer, 64);
        assert_eq!(config.client.request_timeout(), None);
        assert_eq!(config.client.receipt_timeout(), Some(Duration::from_secs(30)));
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_cli_overrides() {
        let args = ConfigArgs {
            port: Some(6000),
            service_name: Some("enricher".to_string()),
            sidecar_host: Some("sidecar.local".to_string()),
            ..Default::default()
        };
        let config = Settings::load_local(&args).unwrap();
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.link.name, "enricher");
        assert_eq!(config.sidecar_endpoint().host, "sidecar.local");
    }

    #[test]
    fn test_config_file_routes() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
host = "0.0.0.0"
port = 7000
advertise_host = "10.1.1.1"

[[routes]]
service_name = "abc"
service_version = "1.0.0"
host = "10.0.0.9"
port = 7100
"#
        )
        .unwrap();

        let args = ConfigArgs {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let config = Settings::load_local(&args).unwrap();
        assert_eq!(config.listen_addr().unwrap().port(), 7000);
        assert_eq!(config.advertised_endpoint(), ServiceEndpoint::new("10.1.1.1", 7000));
        assert_eq!(config.routes.len(), 1);

        use crate::discovery::ServiceLocator;
        let locator = config.locator();
        assert_eq!(locator.resolve("abc", "1.0.0").unwrap().port, 7100);
        assert_eq!(locator.resolve("other", "1.0.0").unwrap(), config.sidecar_endpoint());
    }

    #[test]
    fn test_empty_name_rejected() {
        let args = ConfigArgs {
            service_name: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(matches!(Settings::load_local(&args), Err(Error::Config(_))));
    }

    #[test]
    fn test_environment_layer_only_in_full_load() {
        std::env::set_var("RELAYLINK__LINK__DESCRIPTION", "from-environment");
        let full = Settings::load(&ConfigArgs::default());
        let local = Settings::load_local(&ConfigArgs::default());
        std::env::remove_var("RELAYLINK__LINK__DESCRIPTION");

        assert_eq!(full.unwrap().link.description, "from-environment");
        assert_eq!(local.unwrap().link.description, "relaylink service");
    }
}
