//! Identity of the host this daemon runs on.

use std::net::IpAddr;

/// Name, region, and addresses of the local host.
///
/// The name doubles as the coordination-store node name the host session
/// is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub name: String,
    pub region: String,
    /// Address of the secure data plane (e.g. WireGuard), if any.
    pub secure_ip: Option<IpAddr>,
    /// Private address of the host.
    pub internal_ip: IpAddr,
}

impl HostIdentity {
    /// The address internal ports bind to and internal services advertise.
    ///
    /// Falls back to the internal IP on hosts without a secure interface.
    pub fn secure_address(&self) -> IpAddr {
        self.secure_ip.unwrap_or(self.internal_ip)
    }

    /// Tags identifying this host on registered services.
    pub fn service_tags(&self) -> [String; 2] {
        [
            format!("host-{}", self.name),
            format!("region-{}", self.region),
        ]
    }
}
