//! In-memory lookup services.

use crate::enrich::{AsnInfo, AsnLookup, CityInfo, CityLookup, LookupError};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A city lookup answering from a fixed table.
#[derive(Default)]
pub struct StaticCityLookup {
    entries: HashMap<IpAddr, CityInfo>,
}

impl StaticCityLookup {
    /// Add an entry. Panics if `address` is not an IP literal.
    #[must_use]
    pub fn with(mut self, address: &str, info: CityInfo) -> Self {
        let ip = address.parse().unwrap_or_else(|_| panic!("not an IP address: {address}"));
        self.entries.insert(ip, info);
        self
    }
}

impl CityLookup for StaticCityLookup {
    fn city(&self, address: IpAddr) -> Result<Option<CityInfo>, LookupError> {
        Ok(self.entries.get(&address).cloned())
    }
}

/// An ASN lookup answering from a fixed table.
#[derive(Default)]
pub struct StaticAsnLookup {
    entries: HashMap<IpAddr, AsnInfo>,
}

impl StaticAsnLookup {
    /// Add an entry. Panics if `address` is not an IP literal.
    #[must_use]
    pub fn with(mut self, address: &str, number: u32, organization: &str) -> Self {
        let ip = address.parse().unwrap_or_else(|_| panic!("not an IP address: {address}"));
        self.entries.insert(
            ip,
            AsnInfo {
                number: Some(number),
                organization: Some(organization.to_string()),
            },
        );
        self
    }
}

impl AsnLookup for StaticAsnLookup {
    fn asn(&self, address: IpAddr) -> Result<Option<AsnInfo>, LookupError> {
        Ok(self.entries.get(&address).cloned())
    }
}

/// A city lookup that succeeds `healthy_calls` times, then reports a broken
/// database on every call.
pub struct FailingCityLookup {
    healthy_calls: usize,
    calls: AtomicUsize,
}

impl FailingCityLookup {
    #[must_use]
    pub fn after(healthy_calls: usize) -> Self {
        Self {
            healthy_calls,
            calls: AtomicUsize::new(0),
        }
    }
}

impl CityLookup for FailingCityLookup {
    fn city(&self, address: IpAddr) -> Result<Option<CityInfo>, LookupError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.healthy_calls {
            return Ok(None);
        }
        Err(LookupError {
            service: "city",
            address,
            reason: "corrupt search tree".to_string(),
        })
    }
}

/// City data named `name`; the remaining fields are fixed London values.
#[must_use]
pub fn sample_city(name: &str) -> CityInfo {
    CityInfo {
        city: Some(name.to_string()),
        postal: Some("EC1A".to_string()),
        country: Some("United Kingdom".to_string()),
        continent: Some("Europe".to_string()),
        latitude: Some(51.5142),
        longitude: Some(-0.0931),
        radius: Some(10),
    }
}
