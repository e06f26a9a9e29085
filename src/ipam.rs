//! Tunnel address allocator
//!
//! Hands out unique host addresses from a CIDR pool. The used set lives in
//! memory and must be primed with [`AddressAllocator::mark_used`] from durable
//! state before the first allocation after a restart.

use crate::error::{ArmorError, Result};
use ipnet::IpNet;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Mutex;
use tracing::debug;

/// Address allocator over a single CIDR pool
#[derive(Debug)]
pub struct AddressAllocator {
    subnet: IpNet,
    used: Mutex<HashSet<IpAddr>>,
}

impl AddressAllocator {
    /// Create an allocator for the given pool
    pub fn new(subnet: IpNet) -> Self {
        Self {
            subnet: subnet.trunc(),
            used: Mutex::new(HashSet::new()),
        }
    }

    /// Parse the pool from CIDR notation
    pub fn from_cidr(cidr: &str) -> Result<Self> {
        let subnet: IpNet = cidr
            .trim()
            .parse()
            .map_err(|e| ArmorError::Config(format!("Invalid pool CIDR '{}': {}", cidr, e)))?;
        Ok(Self::new(subnet))
    }

    /// The pool this allocator draws from
    pub fn subnet(&self) -> IpNet {
        self.subnet
    }

    /// First host address of the pool (conventionally the gateway)
    pub fn first_host(&self) -> Option<IpAddr> {
        self.candidates().next()
    }

    /// Allocate the lowest free host address and mark it used
    pub fn allocate(&self) -> Result<IpAddr> {
        let mut used = self.used.lock().unwrap();
        let addr = self
            .candidates()
            .find(|candidate| !used.contains(candidate))
            .ok_or_else(|| ArmorError::PoolExhausted {
                subnet: self.subnet.to_string(),
            })?;
        used.insert(addr);
        debug!(address = %addr, pool = %self.subnet, "Allocated tunnel address");
        Ok(addr)
    }

    /// Return an address to the pool
    pub fn release(&self, addr: IpAddr) {
        if self.used.lock().unwrap().remove(&addr) {
            debug!(address = %addr, "Released tunnel address");
        }
    }

    /// Register an address as taken; idempotent
    pub fn mark_used(&self, addr: IpAddr) {
        self.used.lock().unwrap().insert(addr);
    }

    /// Whether an address is currently taken
    pub fn is_used(&self, addr: IpAddr) -> bool {
        self.used.lock().unwrap().contains(&addr)
    }

    /// Number of addresses currently taken
    pub fn used_count(&self) -> usize {
        self.used.lock().unwrap().len()
    }

    /// Host addresses in scan order: base + 1 upward, network and broadcast excluded.
    fn candidates(&self) -> impl Iterator<Item = IpAddr> + '_ {
        let network = self.subnet.network();
        let broadcast = self.subnet.broadcast();
        let mut cursor = Some(network);
        std::iter::from_fn(move || {
            let next = increment(cursor?)?;
            cursor = Some(next);
            Some(next)
        })
        .take_while(move |addr| self.subnet.contains(addr))
        .filter(move |addr| *addr != network && *addr != broadcast)
    }
}

/// Add one to an address read as a big-endian integer; `None` on overflow.
fn increment(addr: IpAddr) -> Option<IpAddr> {
    match addr {
        IpAddr::V4(v4) => u32::from(v4)
            .checked_add(1)
            .map(|n| IpAddr::V4(Ipv4Addr::from(n))),
        IpAddr::V6(v6) => u128::from(v6)
            .checked_add(1)
            .map(|n| IpAddr::V6(Ipv6Addr::from(n))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_first_allocation_skips_network() {
        let pool = AddressAllocator::from_cidr("10.8.0.0/22").unwrap();
        assert_eq!(pool.allocate().unwrap(), ip("10.8.0.1"));
    }

    #[test]
    fn test_reserved_gateway_is_skipped() {
        let pool = AddressAllocator::from_cidr("10.8.0.0/22").unwrap();
        pool.mark_used(pool.first_host().unwrap());
        assert_eq!(pool.allocate().unwrap(), ip("10.8.0.2"));
        assert_eq!(pool.allocate().unwrap(), ip("10.8.0.3"));
    }

    #[test]
    fn test_carry_across_octet() {
        let pool = AddressAllocator::from_cidr("10.8.0.0/22").unwrap();
        for last in 1..=254 {
            pool.mark_used(ip(&format!("10.8.0.{}", last)));
        }
        assert_eq!(pool.allocate().unwrap(), ip("10.8.0.255"));
        assert_eq!(pool.allocate().unwrap(), ip("10.8.1.0"));
    }

    #[test]
    fn test_exhaustion() {
        let pool = AddressAllocator::from_cidr("192.168.5.0/30").unwrap();
        assert_eq!(pool.allocate().unwrap(), ip("192.168.5.1"));
        assert_eq!(pool.allocate().unwrap(), ip("192.168.5.2"));
        let err = pool.allocate().unwrap_err();
        assert!(matches!(err, ArmorError::PoolExhausted { .. }));
    }

    #[test]
    fn test_release_makes_address_reusable() {
        let pool = AddressAllocator::from_cidr("10.8.0.0/29").unwrap();
        let a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();
        pool.release(a);
        assert!(!pool.is_used(a));
        assert_eq!(pool.allocate().unwrap(), a);
    }

    #[test]
    fn test_mark_used_is_idempotent() {
        let pool = AddressAllocator::from_cidr("10.8.0.0/24").unwrap();
        pool.mark_used(ip("10.8.0.1"));
        pool.mark_used(ip("10.8.0.1"));
        assert_eq!(pool.used_count(), 1);
    }

    #[test]
    fn test_host_bits_in_cidr_are_truncated() {
        let pool = AddressAllocator::from_cidr("10.8.0.77/24").unwrap();
        assert_eq!(pool.subnet().to_string(), "10.8.0.0/24");
    }

    #[test]
    fn test_ipv6_pool() {
        let pool = AddressAllocator::from_cidr("fd00::/126").unwrap();
        assert_eq!(pool.allocate().unwrap(), ip("fd00::1"));
        assert_eq!(pool.allocate().unwrap(), ip("fd00::2"));
        assert!(pool.allocate().is_err());
    }

    #[test]
    fn test_concurrent_allocations_are_unique() {
        let pool = Arc::new(AddressAllocator::from_cidr("10.8.0.0/22").unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || (0..50).map(|_| pool.allocate().unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for addr in handle.join().unwrap() {
                assert!(seen.insert(addr), "duplicate allocation {}", addr);
            }
        }
        assert_eq!(seen.len(), 400);
    }

    proptest! {
        #[test]
        fn prop_allocations_stay_inside_pool(prefix in 24u8..=30, count in 1usize..64) {
            let pool = AddressAllocator::new(format!("10.20.0.0/{}", prefix).parse().unwrap());
            let net = pool.subnet();
            for _ in 0..count {
                match pool.allocate() {
                    Ok(addr) => {
                        prop_assert!(net.contains(&addr));
                        prop_assert_ne!(addr, net.network());
                        prop_assert_ne!(addr, net.broadcast());
                    }
                    Err(e) => {
                        prop_assert!(matches!(e, ArmorError::PoolExhausted { .. }), "unexpected error: {}", e);
                        break;
                    }
                }
            }
        }

        #[test]
        fn prop_released_address_comes_back(release_idx in 0usize..10) {
            let pool = AddressAllocator::from_cidr("10.30.0.0/28").unwrap();
            let taken: Vec<_> = (0..10).map(|_| pool.allocate().unwrap()).collect();
            let victim = taken[release_idx];
            pool.release(victim);

            let mut found = false;
            while let Ok(addr) = pool.allocate() {
                if addr == victim {
                    found = true;
                    break;
                }
            }
            prop_assert!(found);
        }
    }
}
