//! Remote endpoint addresses.

use crate::error::ConfigurationError;
use std::fmt;
use std::str::FromStr;

/// A parsed remote replication endpoint, e.g. `wss://sync.example.com:4984/db`.
///
/// Only WebSocket schemes are accepted. The path must name the remote
/// database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: Option<u16>,
    path: String,
}

/// Transport scheme of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain WebSocket.
    Ws,
    /// WebSocket over TLS.
    Wss,
}

impl Scheme {
    /// Returns the scheme as written in a URL.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }

    /// Returns the port used when the URL names none.
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        }
    }
}

impl Endpoint {
    /// Parses an endpoint URL.
    pub fn parse(url: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::invalid_endpoint(url, reason);

        if url.chars().any(char::is_whitespace) {
            return Err(invalid("URL contains whitespace"));
        }

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "ws" => Scheme::Ws,
            "wss" => Scheme::Wss,
            "" => return Err(invalid("missing scheme")),
            other => return Err(invalid(&format!("unsupported scheme '{other}'"))),
        };

        if rest.contains(['?', '#']) {
            return Err(invalid("query and fragment are not supported"));
        }

        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };

        if authority.contains('@') {
            return Err(invalid("credentials must not be embedded in the URL"));
        }

        let (host, port) = split_host_port(authority).map_err(|reason| invalid(reason))?;

        let database = path.trim_start_matches('/').split('/').next().unwrap_or("");
        if database.is_empty() {
            return Err(invalid("path must name a remote database"));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// Returns the scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Returns the host, without IPv6 brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the explicit port, if the URL named one.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Returns the port to connect to.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }

    /// Returns the path, including the leading slash.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the remote database name (first path segment).
    pub fn database_name(&self) -> &str {
        self.path
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
    }

    /// Returns true if the endpoint uses TLS.
    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Wss
    }
}

fn split_host_port(authority: &str) -> Result<(&str, Option<u16>), &'static str> {
    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or("unterminated IPv6 address")?;
        if host.is_empty() || !host.chars().all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.')
        {
            return Err("invalid IPv6 address");
        }
        let port = match after {
            "" => None,
            p => Some(p.strip_prefix(':').ok_or("unexpected text after IPv6 address")?),
        };
        (host, port)
    } else {
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        };
        let valid = host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'));
        if !valid {
            return Err("invalid host");
        }
        (host, port)
    };

    if host.is_empty() {
        return Err("missing host");
    }

    let port = match port {
        None => None,
        Some(p) => match p.parse::<u16>() {
            Ok(0) | Err(_) => return Err("invalid port"),
            Ok(p) => Some(p),
        },
    };

    Ok((host, port))
}

impl FromStr for Endpoint {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme.as_str())?;
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        f.write_str(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_full_url() {
        let ep = Endpoint::parse("wss://sync.example.com:4984/travel/extra").unwrap();
        assert_eq!(ep.scheme(), Scheme::Wss);
        assert_eq!(ep.host(), "sync.example.com");
        assert_eq!(ep.port(), Some(4984));
        assert_eq!(ep.path(), "/travel/extra");
        assert_eq!(ep.database_name(), "travel");
        assert!(ep.is_secure());
        assert_eq!(ep.to_string(), "wss://sync.example.com:4984/travel/extra");
    }

    #[test]
    fn default_ports() {
        let ep = Endpoint::parse("ws://localhost/db").unwrap();
        assert_eq!(ep.port(), None);
        assert_eq!(ep.effective_port(), 80);
        assert!(!ep.is_secure());

        let ep: Endpoint = "WSS://localhost/db".parse().unwrap();
        assert_eq!(ep.effective_port(), 443);
    }

    #[test]
    fn parses_ipv6_host() {
        let ep = Endpoint::parse("ws://[::1]:4984/db").unwrap();
        assert_eq!(ep.host(), "::1");
        assert_eq!(ep.port(), Some(4984));
        assert_eq!(ep.to_string(), "ws://[::1]:4984/db");
    }

    #[test]
    fn rejects_malformed_urls() {
        for url in [
            "not a url",
            "",
            "sync.example.com/db",
            "http://sync.example.com/db",
            "ws://",
            "ws:///db",
            "ws://host",
            "ws://host/",
            "ws://host:0/db",
            "ws://host:99999/db",
            "ws://host:abc/db",
            "ws://user:pw@host/db",
            "ws://host/db?x=1",
            "ws://[::1/db",
            "ws://ho$t/db",
        ] {
            let err = Endpoint::parse(url).unwrap_err();
            assert!(
                matches!(err, ConfigurationError::InvalidEndpoint { .. }),
                "{url} should be rejected"
            );
        }
    }

    proptest! {
        #[test]
        fn parse_never_panics(url in "\\PC*") {
            let _ = Endpoint::parse(&url);
        }

        #[test]
        fn display_reparses(host in "[a-z][a-z0-9-]{0,20}", port in 1u16..=u16::MAX, db in "[a-z][a-z0-9_]{0,10}") {
            let url = format!("wss://{host}:{port}/{db}");
            let ep = Endpoint::parse(&url).unwrap();
            prop_assert_eq!(ep.to_string(), url);
            prop_assert_eq!(ep.database_name(), db.as_str());
        }
    }
}
