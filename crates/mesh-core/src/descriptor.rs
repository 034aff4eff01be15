//! Server descriptor: identity and address of one mesh participant.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize};

/// Identity + advertised address of a mesh participant.
///
/// Two descriptors describe the same participant iff their `id`s match.
/// Host and port may differ across restarts; the id never changes within
/// one process lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct ServerDescriptor {
    /// Opaque identifier, 128 random bits in hex.
    pub id: String,
    /// Address at which this participant accepts peer connections.
    pub host: String,
    /// Listening port advertised by this participant. Never zero.
    pub port: u16,
}

impl ServerDescriptor {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
        }
    }

    /// Descriptor for this process, built from the bound listening address.
    ///
    /// Generates a fresh id. Call once at startup and pass the result around.
    pub fn local(advertise_host: Option<&str>, bound: SocketAddr) -> Self {
        let host = match advertise_host {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => bound.ip().to_string(),
        };
        Self::new(generate_id(), host, bound.port())
    }

    /// `host:port` form suitable for `TcpStream::connect`.
    ///
    /// IPv6 literals are bracketed.
    pub fn addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Generate a new participant id from the OS RNG.
pub fn generate_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl PartialEq for ServerDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServerDescriptor {}

impl Hash for ServerDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}

// Remote announcements go through here; reject the obviously unusable ones.
impl<'de> Deserialize<'de> for ServerDescriptor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            id: String,
            host: String,
            port: u16,
        }

        let raw = Raw::deserialize(deserializer)?;
        if raw.id.is_empty() {
            return Err(serde::de::Error::custom("server id must not be empty"));
        }
        if raw.port == 0 {
            return Err(serde::de::Error::custom("server port must be positive"));
        }
        Ok(Self {
            id: raw.id,
            host: raw.host,
            port: raw.port,
        })
    }
}
