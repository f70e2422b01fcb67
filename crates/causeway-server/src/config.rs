//! Server configuration, loaded from a TOML file.
//!
//! ```toml
//! [component]
//! server = "127.0.0.1"
//! port = 5347
//! secret = "handshake-secret"
//!
//! [gateway]
//! domain = "chat.example.net"
//! conference_domain = "rooms.chat.example.net"
//!
//! [store]
//! path = "/var/lib/causeway/credentials.json"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use causeway_xmpp::GatewayConfig;

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub component: ComponentConfig,
    pub gateway: GatewaySection,
    pub store: StoreConfig,
}

/// XEP-0114 component link to the XMPP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentConfig {
    /// Host of the XMPP server accepting the component connection.
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared handshake secret.
    pub secret: String,
}

/// Identity of the gateway itself.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySection {
    /// The component's own domain.
    pub domain: String,
    /// Conference domain for emulated rooms; omit to disable group chat.
    pub conference_domain: Option<String>,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Disco identity type naming the bridged network.
    #[serde(default = "default_network")]
    pub network: String,
}

/// Credential persistence.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path of the JSON credential file.
    pub path: PathBuf,
}

fn default_port() -> u16 {
    5347
}

fn default_display_name() -> String {
    "Causeway Gateway".to_string()
}

fn default_network() -> String {
    "chat".to_string()
}

impl ServerConfig {
    /// Read and parse the configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        let config: ServerConfig = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("cannot parse {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Resolve the gateway section into the core's typed configuration.
    pub fn gateway_config(&self) -> anyhow::Result<GatewayConfig> {
        let domain = self
            .gateway
            .domain
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid gateway domain: {e}"))?;
        let conference_domain = match &self.gateway.conference_domain {
            Some(domain) => Some(
                domain
                    .parse()
                    .map_err(|e| anyhow::anyhow!("invalid conference domain: {e}"))?,
            ),
            None => None,
        };
        Ok(GatewayConfig {
            domain,
            conference_domain,
            display_name: self.gateway.display_name.clone(),
            network: self.gateway.network.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_config() {
        let config: ServerConfig = toml::from_str(
            r#"
            [component]
            server = "127.0.0.1"
            secret = "s3cret"

            [gateway]
            domain = "chat.example.net"
            conference_domain = "rooms.chat.example.net"

            [store]
            path = "/tmp/credentials.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.component.port, 5347);
        assert_eq!(config.gateway.display_name, "Causeway Gateway");

        let gateway = config.gateway_config().unwrap();
        assert_eq!(gateway.domain.to_string(), "chat.example.net");
        assert_eq!(
            gateway.conference_domain.map(|d| d.to_string()),
            Some("rooms.chat.example.net".to_string())
        );
    }

    #[test]
    fn conference_domain_is_optional() {
        let config: ServerConfig = toml::from_str(
            r#"
            [component]
            server = "127.0.0.1"
            secret = "s3cret"

            [gateway]
            domain = "chat.example.net"

            [store]
            path = "/tmp/credentials.json"
            "#,
        )
        .unwrap();
        assert!(config.gateway_config().unwrap().conference_domain.is_none());
    }

    #[test]
    fn invalid_domain_is_rejected() {
        let config: ServerConfig = toml::from_str(
            r#"
            [component]
            server = "127.0.0.1"
            secret = "s3cret"

            [gateway]
            domain = ""

            [store]
            path = "/tmp/credentials.json"
            "#,
        )
        .unwrap();
        assert!(config.gateway_config().is_err());
    }
}
