//! HTTP server configuration.

use serde::{Deserialize, Serialize};

/// HTTP listener and mounted WebSocket services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// WebSocket services to mount.
    #[serde(default = "default_services")]
    pub services: Vec<ServiceMount>,
}

/// One WebSocket service mounted at a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMount {
    /// Absolute URL path, e.g. `/chat`.
    pub path: String,
    /// Name of the built-in behavior to run (`echo` or `chat`).
    pub behavior: String,
}

impl ServerConfig {
    /// Returns the `host:port` bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            services: default_services(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_services() -> Vec<ServiceMount> {
    vec![
        ServiceMount {
            path: "/echo".to_string(),
            behavior: "echo".to_string(),
        },
        ServiceMount {
            path: "/chat".to_string(),
            behavior: "chat".to_string(),
        },
    ]
}
