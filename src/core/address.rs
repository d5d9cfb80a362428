use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use anyhow::{anyhow, Result};

/// Network identity of a paired device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddr(SocketAddr);

impl DeviceAddr {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(ip, port))
    }

    /// Parse `ip:port`, or a bare `ip` completed with `default_port`
    pub fn parse_with_default_port(input: &str, default_port: u16) -> Result<Self> {
        if let Ok(addr) = input.parse::<SocketAddr>() {
            return Ok(Self(addr));
        }
        let ip = input
            .parse::<IpAddr>()
            .map_err(|_| anyhow!("Invalid device address: {}", input))?;
        Ok(Self::new(ip, default_port))
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// Root URL of the device's control protocol
    pub fn base_url(&self) -> String {
        format!("http://{}", self.0)
    }
}

impl fmt::Display for DeviceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceAddr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<SocketAddr>()
            .map(Self)
            .map_err(|_| anyhow!("Invalid device address (expected ip:port): {}", s))
    }
}

impl From<SocketAddr> for DeviceAddr {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_default_port() {
        let addr = DeviceAddr::parse_with_default_port("10.0.0.7", 8080).unwrap();
        assert_eq!(addr.port(), 8080);
        assert_eq!(addr.to_string(), "10.0.0.7:8080");

        let explicit = DeviceAddr::parse_with_default_port("10.0.0.7:9000", 8080).unwrap();
        assert_eq!(explicit.port(), 9000);
    }

    #[test]
    fn test_base_url() {
        let addr: DeviceAddr = "192.168.0.12:8080".parse().unwrap();
        assert_eq!(addr.base_url(), "http://192.168.0.12:8080");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("not-an-ip".parse::<DeviceAddr>().is_err());
        assert!(DeviceAddr::parse_with_default_port("phone.local", 8080).is_err());
    }
}
