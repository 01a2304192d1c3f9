use std::{collections::HashMap, env};

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// When true, staff may only advance an order one pipeline step at a
    /// time; when false any status transition is accepted.
    pub strict_order_status_flow: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let strict_order_status_flow = env::var("STRICT_ORDER_STATUS_FLOW")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Ok(Self {
            port,
            database_url,
            host,
            strict_order_status_flow,
        })
    }
}

/// Identity-provider verification material for one deployment host.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub issuer: String,
    pub audience: String,
    pub secret: String,
}

/// Host to identity-provider lookup, built once at startup.
///
/// One deployment can serve several storefront domains, each fronted by
/// its own identity provider. Login callbacks are matched on the request
/// `Host` header and fall back to the default provider when no override
/// is registered.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    default: ProviderConfig,
    by_host: HashMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn from_env() -> anyhow::Result<Self> {
        let default = ProviderConfig {
            issuer: env::var("IDP_ISSUER")?,
            audience: env::var("IDP_AUDIENCE")?,
            secret: env::var("IDP_SECRET")?,
        };
        // Optional JSON object: {"shop.example.com": {"issuer": ..., ...}}
        let by_host = match env::var("IDP_HOST_PROVIDERS") {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(_) => HashMap::new(),
        };
        Ok(Self { default, by_host })
    }

    pub fn new(default: ProviderConfig, by_host: HashMap<String, ProviderConfig>) -> Self {
        Self { default, by_host }
    }

    pub fn for_host(&self, host: &str) -> &ProviderConfig {
        // Host headers may carry a port; match on the name alone.
        let name = host.split(':').next().unwrap_or(host);
        self.by_host.get(name).unwrap_or(&self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(issuer: &str) -> ProviderConfig {
        ProviderConfig {
            issuer: issuer.to_string(),
            audience: "cupcake-shop".to_string(),
            secret: "test-secret".to_string(),
        }
    }

    #[test]
    fn for_host_falls_back_to_default() {
        let registry = ProviderRegistry::new(provider("https://idp.default"), HashMap::new());
        assert_eq!(registry.for_host("unknown.example.com").issuer, "https://idp.default");
    }

    #[test]
    fn for_host_matches_override_and_strips_port() {
        let mut by_host = HashMap::new();
        by_host.insert("shop.example.com".to_string(), provider("https://idp.shop"));
        let registry = ProviderRegistry::new(provider("https://idp.default"), by_host);

        assert_eq!(registry.for_host("shop.example.com").issuer, "https://idp.shop");
        assert_eq!(registry.for_host("shop.example.com:8080").issuer, "https://idp.shop");
    }
}
