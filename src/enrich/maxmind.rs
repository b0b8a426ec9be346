//! MaxMind (`.mmdb`) backed lookup services.
//!
//! Databases are read fully into memory when opened; lookups afterwards are
//! plain reads shared by all workers. Opening validates the database type so
//! that swapping the City and ASN paths fails at startup instead of producing
//! empty columns.

use super::{AsnInfo, AsnLookup, CityInfo, CityLookup, LookupError};
use crate::error::EtlError;
use anyhow::Result;
use maxminddb::{MaxMindDBError, Reader, geoip2};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use tracing::debug;

/// Locale used for place names.
const LOCALE: &str = "en";

fn open_checked(path: &Path, kind: &'static str, marker: &str) -> Result<Reader<Vec<u8>>> {
    if !path.is_file() {
        return Err(EtlError::lookup_database(kind, path, "not a regular file").into());
    }
    let reader = Reader::open_readfile(path).map_err(|e| EtlError::lookup_database(kind, path, e.to_string()))?;
    let database_type = &reader.metadata.database_type;
    if !database_type.contains(marker) {
        return Err(EtlError::lookup_database(kind, path, format!("database type is '{database_type}'")).into());
    }
    debug!(path = %path.display(), database_type, "opened lookup database");
    Ok(reader)
}

fn localized(names: Option<&BTreeMap<&str, &str>>) -> Option<String> {
    names.and_then(|n| n.get(LOCALE)).map(|s| (*s).to_string())
}

/// A GeoIP2/GeoLite2 City database.
pub struct MaxMindCity {
    reader: Reader<Vec<u8>>,
}

impl MaxMindCity {
    /// Open and validate a City database.
    ///
    /// # Errors
    /// Returns [`EtlError::LookupDatabase`] if the file is missing, unreadable
    /// or not a City database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            reader: open_checked(path.as_ref(), "City", "City")?,
        })
    }
}

impl CityLookup for MaxMindCity {
    fn city(&self, address: IpAddr) -> Result<Option<CityInfo>, LookupError> {
        let found: geoip2::City = match self.reader.lookup(address) {
            Ok(found) => found,
            Err(MaxMindDBError::AddressNotFoundError(_)) => return Ok(None),
            Err(e) => {
                return Err(LookupError {
                    service: "city",
                    address,
                    reason: e.to_string(),
                });
            }
        };
        let location = found.location.as_ref();
        Ok(Some(CityInfo {
            city: localized(found.city.as_ref().and_then(|c| c.names.as_ref())),
            postal: found.postal.as_ref().and_then(|p| p.code).map(str::to_string),
            country: localized(found.country.as_ref().and_then(|c| c.names.as_ref())),
            continent: localized(found.continent.as_ref().and_then(|c| c.names.as_ref())),
            latitude: location.and_then(|l| l.latitude),
            longitude: location.and_then(|l| l.longitude),
            radius: location.and_then(|l| l.accuracy_radius),
        }))
    }
}

/// A GeoLite2 ASN database.
pub struct MaxMindAsn {
    reader: Reader<Vec<u8>>,
}

impl MaxMindAsn {
    /// Open and validate an ASN database.
    ///
    /// # Errors
    /// Returns [`EtlError::LookupDatabase`] if the file is missing, unreadable
    /// or not an ASN database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            reader: open_checked(path.as_ref(), "ASN", "ASN")?,
        })
    }
}

impl AsnLookup for MaxMindAsn {
    fn asn(&self, address: IpAddr) -> Result<Option<AsnInfo>, LookupError> {
        match self.reader.lookup::<geoip2::Asn>(address) {
            Ok(found) => Ok(Some(AsnInfo {
                number: found.autonomous_system_number,
                organization: found.autonomous_system_organization.map(str::to_string),
            })),
            Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(None),
            Err(e) => Err(LookupError {
                service: "asn",
                address,
                reason: e.to_string(),
            }),
        }
    }
}
