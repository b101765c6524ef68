use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::FleetError;

/// Client addresses of the overlay subnet. The network and broadcast addresses
/// are never handed out, nor is the first usable address, which the VPN server holds.
#[derive(Debug, Clone, Copy)]
pub struct AddressPool {
    net: Ipv4Net,
}

impl AddressPool {
    pub fn new(net: Ipv4Net) -> Self {
        Self { net: net.trunc() }
    }

    pub fn parse(cidr: &str) -> Result<Self, FleetError> {
        cidr.parse::<Ipv4Net>()
            .map(Self::new)
            .map_err(|e| FleetError::InvalidInput(format!("invalid VPN subnet '{cidr}': {e}")))
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.net.netmask()
    }

    pub fn server_address(&self) -> Option<Ipv4Addr> {
        self.net.hosts().next()
    }

    /// Candidate client addresses in ascending order.
    pub fn client_addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        // /31 and /32 yield every address from hosts(); drop the real network and broadcast anyway.
        let network = self.net.network();
        let broadcast = self.net.broadcast();
        let server = self.server_address();
        self.net
            .hosts()
            .filter(move |ip| *ip != network && *ip != broadcast && Some(*ip) != server)
    }

    pub fn capacity(&self) -> usize {
        self.client_addresses().count()
    }

    /// The lowest client address for which `taken` is false.
    pub fn lowest_free(&self, taken: impl Fn(Ipv4Addr) -> bool) -> Option<Ipv4Addr> {
        self.client_addresses().find(|ip| !taken(*ip))
    }
}
