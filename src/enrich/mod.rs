//! Address enrichment from two independent lookup services.
//!
//! The city service and the ASN service are queried separately and their
//! answers folded into one [`EnrichmentRecord`] before anything is written, so
//! a stored row always reflects both services as of the same occurrence.
//!
//! "Address not found" is an ordinary answer (`Ok(None)`); only a broken
//! database produces a [`LookupError`].

pub mod maxmind;

use crate::record::EnrichmentRecord;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

pub use maxmind::{MaxMindAsn, MaxMindCity};

/// A lookup failed for a reason other than the address being absent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{service} lookup for {address} failed: {reason}")]
pub struct LookupError {
    pub service: &'static str,
    pub address: IpAddr,
    pub reason: String,
}

/// City-level geographic data for an address.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CityInfo {
    pub city: Option<String>,
    pub postal: Option<String>,
    pub country: Option<String>,
    pub continent: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius: Option<u16>,
}

/// Autonomous-system ownership of an address.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AsnInfo {
    pub number: Option<u32>,
    pub organization: Option<String>,
}

/// A read-only city database.
pub trait CityLookup: Send + Sync {
    /// `Ok(None)` when the address is not in the database.
    fn city(&self, address: IpAddr) -> Result<Option<CityInfo>, LookupError>;
}

/// A read-only ASN database.
pub trait AsnLookup: Send + Sync {
    /// `Ok(None)` when the address is not in the database.
    fn asn(&self, address: IpAddr) -> Result<Option<AsnInfo>, LookupError>;
}

/// Resolves addresses against whichever services are configured.
///
/// Cheap to clone; the services are shared behind `Arc`.
#[derive(Clone, Default)]
pub struct Enricher {
    city: Option<Arc<dyn CityLookup>>,
    asn: Option<Arc<dyn AsnLookup>>,
}

impl Enricher {
    /// An enricher with no services; [`is_enabled`](Self::is_enabled) is false.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new(city: Option<Arc<dyn CityLookup>>, asn: Option<Arc<dyn AsnLookup>>) -> Self {
        Self { city, asn }
    }

    #[must_use]
    pub fn with_city(mut self, city: Arc<dyn CityLookup>) -> Self {
        self.city = Some(city);
        self
    }

    #[must_use]
    pub fn with_asn(mut self, asn: Arc<dyn AsnLookup>) -> Self {
        self.asn = Some(asn);
        self
    }

    /// True when at least one service is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.city.is_some() || self.asn.is_some()
    }

    /// Build the enrichment row for `address`.
    ///
    /// Addresses that are not IP literals (hostnames from `HostnameLookups On`)
    /// resolve to an all-null record.
    ///
    /// # Errors
    /// Returns the first [`LookupError`] raised by a service.
    pub fn resolve(&self, address: &str) -> Result<EnrichmentRecord, LookupError> {
        let mut record = EnrichmentRecord::empty(address);
        let Ok(ip) = address.parse::<IpAddr>() else {
            return Ok(record);
        };

        if let Some(city) = &self.city
            && let Some(info) = city.city(ip)?
        {
            record.city = info.city;
            record.postal = info.postal;
            record.country = info.country;
            record.continent = info.continent;
            record.latitude = info.latitude;
            record.longitude = info.longitude;
            record.radius = info.radius;
        }
        if let Some(asn) = &self.asn
            && let Some(info) = asn.asn(ip)?
        {
            record.asn = info.number;
            record.asn_org = info.organization;
        }
        Ok(record)
    }
}
