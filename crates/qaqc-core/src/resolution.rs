//! Infer each site's temporal resolution from its latest upload filenames.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Temporal resolution token passed to the QAQC job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Resolution {
    /// `_HH_` files (half-hourly records).
    #[serde(rename = "HH")]
    HalfHourly,
    /// `_HR_` files (hourly records).
    #[serde(rename = "HR")]
    Hourly,
    /// No resolution marker in the filename.
    #[serde(rename = "None")]
    Unmarked,
}

impl Resolution {
    /// Token for a dispatch whose site has no inferred resolution.
    pub const ABSENT_TOKEN: &'static str = "None";

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HalfHourly => "HH",
            Self::Hourly => "HR",
            Self::Unmarked => "None",
        }
    }

    /// Classify one filename by its marker.
    #[must_use]
    pub fn from_filename(filename: &str) -> Self {
        if filename.contains("_HH_") {
            Self::HalfHourly
        } else if filename.contains("_HR_") {
            Self::Hourly
        } else {
            Self::Unmarked
        }
    }

    /// Token for an optional resolution, as handed to the job command line.
    #[must_use]
    pub fn token(resolution: Option<Self>) -> &'static str {
        resolution.map_or(Self::ABSENT_TOKEN, Self::as_str)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the site → resolution lookup.
///
/// A site whose files disagree is ambiguous and left out, as is a site with
/// no files at all.
#[must_use]
pub fn resolve_resolutions(
    uploads: &BTreeMap<String, Vec<String>>,
) -> BTreeMap<String, Resolution> {
    uploads
        .iter()
        .filter_map(|(site_id, filenames)| {
            let distinct: BTreeSet<Resolution> = filenames
                .iter()
                .map(|name| Resolution::from_filename(name))
                .collect();
            let mut iter = distinct.into_iter();
            match (iter.next(), iter.next()) {
                (Some(only), None) => Some((site_id.clone(), only)),
                _ => None,
            }
        })
        .collect()
}
