//! Endpoint resolution and the `connect` string syntax.
//!
//! A tunnel is described by `[<in><out>/]<accept>/<target>[,<target>...]`
//! where `<in>`/`<out>` are `p` (plain TCP) or `s` (TLS), e.g.
//! `sp/0.0.0.0:8443/127.0.0.1:8080`.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::{Result, TunnelError};

/// A resolved network address plus its TLS policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    addr: SocketAddr,
    host: String,
    tls: bool,
}

impl Endpoint {
    pub fn new(addr: SocketAddr, tls: bool) -> Self {
        Self {
            addr,
            host: addr.ip().to_string(),
            tls,
        }
    }

    /// Resolve `host:port`. An empty host (`:8080`) means all interfaces.
    pub fn resolve(spec: &str, tls: bool) -> Result<Self> {
        let spec = spec.trim();
        let (host, port) = spec
            .rsplit_once(':')
            .ok_or_else(|| TunnelError::invalid_endpoint(spec, "missing port"))?;
        let port: u16 = port
            .parse()
            .map_err(|_| TunnelError::invalid_endpoint(spec, "bad port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let host = if host.is_empty() { "0.0.0.0" } else { host };

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| TunnelError::invalid_endpoint(spec, e.to_string()))?
            .next()
            .ok_or_else(|| TunnelError::invalid_endpoint(spec, "no address found"))?;

        Ok(Self {
            addr,
            host: host.to_string(),
            tls,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Host text the endpoint was resolved from; used as the TLS server name.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Ordered, non-empty outbound pool sharing one TLS policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointList {
    endpoints: Vec<Endpoint>,
}

impl EndpointList {
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(TunnelError::config_error("endpoint list cannot be empty"));
        }
        Ok(Self { endpoints })
    }

    /// Resolve a comma separated list of `host:port`.
    pub fn resolve(spec: &str, tls: bool) -> Result<Self> {
        let endpoints = spec
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| Endpoint::resolve(s, tls))
            .collect::<Result<Vec<_>>>()?;
        Self::new(endpoints)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn first(&self) -> &Endpoint {
        &self.endpoints[0]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Endpoint> {
        self.endpoints.iter()
    }
}

impl fmt::Display for EndpointList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, ep) in self.endpoints.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", ep)?;
        }
        Ok(())
    }
}

/// Protocol prefix of a connect string: TLS on the accept / connect side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Protocol {
    pub accept_tls: bool,
    pub connect_tls: bool,
}

impl std::str::FromStr for Protocol {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        let flag = |c: u8| match c {
            b'p' | b'P' => Ok(false),
            b's' | b'S' => Ok(true),
            _ => Err(TunnelError::config_error(format!(
                "bad protocol '{}': expected two of 'p' or 's'",
                s
            ))),
        };
        match s.as_bytes() {
            [a, b] => Ok(Self {
                accept_tls: flag(*a)?,
                connect_tls: flag(*b)?,
            }),
            _ => Err(TunnelError::config_error(format!(
                "bad protocol '{}': expected two of 'p' or 's'",
                s
            ))),
        }
    }
}

/// Parse and resolve a connect string into the inbound endpoint and the
/// outbound pool.
pub fn parse_connect(spec: &str) -> Result<(Endpoint, EndpointList)> {
    let parts: Vec<&str> = spec.trim().split('/').collect();
    let (protocol, accept, connect) = match parts.as_slice() {
        [accept, connect] => (Protocol::default(), *accept, *connect),
        [protocol, accept, connect] => (protocol.parse()?, *accept, *connect),
        _ => {
            return Err(TunnelError::config_error(format!(
                "bad connect '{}': expected [pp|ps|sp|ss/]<accept>/<target>[,<target>...]",
                spec
            )))
        }
    };

    let accept = Endpoint::resolve(accept, protocol.accept_tls)?;
    let connect = EndpointList::resolve(connect, protocol.connect_tls)?;
    Ok((accept, connect))
}
