//! Flow policy tables.

use crate::types::{DocumentType, FaceMatch};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Whether a document type needs a back capture before face compare.
///
/// Driving licences are front-only; every other type needs its back.
const BACK_CAPTURE_POLICY: [(DocumentType, bool); 5] = [
    (DocumentType::Citizenship, true),
    (DocumentType::DrivingLicense, false),
    (DocumentType::NationalId, true),
    (DocumentType::Passport, true),
    (DocumentType::Unknown, true),
];

pub fn requires_back(document_type: DocumentType) -> bool {
    BACK_CAPTURE_POLICY
        .iter()
        .find(|(t, _)| *t == document_type)
        .map(|(_, needs)| *needs)
        .unwrap_or(true)
}

/// Which comparator match is authoritative when the target image holds more
/// than one face.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSelection {
    /// Highest similarity wins.
    #[default]
    Highest,
    /// Positional: whatever the comparator listed first.
    First,
}

impl MatchSelection {
    pub fn select<'a>(&self, matches: &'a [FaceMatch]) -> Option<&'a FaceMatch> {
        match self {
            MatchSelection::First => matches.first(),
            MatchSelection::Highest => matches.iter().max_by(|a, b| {
                a.similarity
                    .partial_cmp(&b.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        }
    }
}

impl FromStr for MatchSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "highest" => Ok(MatchSelection::Highest),
            "first" => Ok(MatchSelection::First),
            other => Err(format!("unknown match selection {other:?} (expected highest|first)")),
        }
    }
}
