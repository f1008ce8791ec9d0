//! Broker addresses and connection settings.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Default AMQP port, used when an address omits one.
pub const DEFAULT_PORT: u16 = 5672;

/// One broker node candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    /// Creates an address from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host name or IP literal.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidAddress {
                address: self.to_string(),
                reason: "host is empty",
            });
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidAddress {
                address: self.to_string(),
                reason: "port must be non-zero",
            });
        }
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parses `host`, `host:port` or `[ipv6]:port`.
impl FromStr for Address {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ConfigError::InvalidAddress {
            address: s.to_string(),
            reason,
        };

        let s = s.trim();
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| invalid("unclosed '['"))?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => return Err(invalid("unexpected text after ']'")),
            }
        } else {
            match s.rsplit_once(':') {
                Some((host, _)) if host.contains(':') => {
                    return Err(invalid("IPv6 addresses must be enclosed in brackets"))
                }
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid("port is not a number"))?,
            None => DEFAULT_PORT,
        };

        let address = Address::new(host, port);
        address.validate()?;
        Ok(address)
    }
}

/// Login credentials for the broker.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Returns the user name.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the password.
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new("guest", "guest")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything a connector needs to open a broker connection.
///
/// Immutable once built; every connect attempt receives the same settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    addresses: Vec<Address>,
    virtual_host: String,
    credentials: Credentials,
    use_tls: bool,
}

impl ConnectionSettings {
    /// Creates a new builder.
    pub fn builder() -> ConnectionSettingsBuilder {
        ConnectionSettingsBuilder::new()
    }

    /// Ordered candidate addresses.
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    /// Virtual host to open.
    pub fn virtual_host(&self) -> &str {
        &self.virtual_host
    }

    /// Login credentials.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Whether the transport should be TLS-wrapped.
    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    pub(crate) fn describe_addresses(&self) -> String {
        let joined: Vec<String> = self.addresses.iter().map(Address::to_string).collect();
        format!("[{}]", joined.join(", "))
    }
}

/// Builder for [`ConnectionSettings`].
#[derive(Debug, Clone)]
pub struct ConnectionSettingsBuilder {
    addresses: Vec<Address>,
    virtual_host: String,
    credentials: Credentials,
    use_tls: bool,
}

impl ConnectionSettingsBuilder {
    /// Creates a builder with no addresses, virtual host `/` and `guest` credentials.
    pub fn new() -> Self {
        Self {
            addresses: Vec::new(),
            virtual_host: "/".to_string(),
            credentials: Credentials::default(),
            use_tls: false,
        }
    }

    /// Appends a candidate address.
    pub fn address(mut self, address: Address) -> Self {
        self.addresses.push(address);
        self
    }

    /// Appends several candidate addresses, keeping their order.
    pub fn addresses<I>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = Address>,
    {
        self.addresses.extend(addresses);
        self
    }

    /// Sets the virtual host.
    pub fn virtual_host(mut self, vhost: impl Into<String>) -> Self {
        self.virtual_host = vhost.into();
        self
    }

    /// Sets the login credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Credentials::new(username, password);
        self
    }

    /// Enables or disables TLS.
    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Validates and builds the settings.
    ///
    /// # Errors
    ///
    /// Fails when no address was given, an address is malformed, or the
    /// virtual host or user name is empty.
    pub fn build(self) -> Result<ConnectionSettings, ConfigError> {
        if self.addresses.is_empty() {
            return Err(ConfigError::NoAddresses);
        }
        for address in &self.addresses {
            address.validate()?;
        }
        if self.virtual_host.is_empty() {
            return Err(ConfigError::EmptyVirtualHost);
        }
        if self.credentials.username.is_empty() {
            return Err(ConfigError::EmptyUsername);
        }

        Ok(ConnectionSettings {
            addresses: self.addresses,
            virtual_host: self.virtual_host,
            credentials: self.credentials,
            use_tls: self.use_tls,
        })
    }
}

impl Default for ConnectionSettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
