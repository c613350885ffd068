//! County identifiers

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// A county keyed by its state and county FIPS codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CountyKey {
    pub state: u32,
    pub county: u32,
}

impl CountyKey {
    pub fn new(state: u32, county: u32) -> Self {
        Self { state, county }
    }

    /// Build a key after checking it fits the 2+3 digit identifier layout.
    pub fn checked(state: u32, county: u32) -> Result<Self> {
        if state > 99 || county > 999 {
            return Err(AnalysisError::invalid_input(format!(
                "county key ({state}, {county}) does not fit a 5-digit identifier"
            )));
        }
        Ok(Self { state, county })
    }

    /// Parse a 5-digit county identifier (2-digit state + 3-digit county).
    pub fn from_geoid(geoid: &str) -> Result<Self> {
        let geoid = geoid.trim();
        if geoid.len() != 5 || !geoid.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AnalysisError::invalid_input(format!(
                "malformed county identifier '{geoid}'"
            )));
        }
        // All-digit strings of this length always parse.
        let state = geoid[..2].parse().map_err(|_| {
            AnalysisError::invalid_input(format!("malformed state code in '{geoid}'"))
        })?;
        let county = geoid[2..].parse().map_err(|_| {
            AnalysisError::invalid_input(format!("malformed county code in '{geoid}'"))
        })?;
        Ok(Self { state, county })
    }

    /// The 5-digit, zero-padded identifier.
    pub fn geoid(&self) -> String {
        format!("{:02}{:03}", self.state, self.county)
    }
}

impl fmt::Display for CountyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{:03}", self.state, self.county)
    }
}
