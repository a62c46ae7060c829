use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BioassayId(u64);

impl BioassayId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BioassayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BioassayId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let trimmed = trimmed
            .strip_prefix("AID")
            .or_else(|| trimmed.strip_prefix("aid"))
            .unwrap_or(trimmed);
        trimmed
            .parse::<u64>()
            .map(Self)
            .map_err(|_| KiraError::InvalidBioassayId(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProteinAccession(String);

impl ProteinAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProteinAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProteinAccession {
    type Err = KiraError;

    /// Everything after the last `.` is a version and is dropped: `P12345.2` -> `P12345`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let base = match trimmed.rsplit_once('.') {
            Some((head, _version)) => head,
            None => trimmed,
        };
        if base.is_empty() || base.chars().any(char::is_whitespace) {
            return Err(KiraError::InvalidProteinAccession(value.to_string()));
        }
        Ok(Self(base.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniprotId(String);

impl UniprotId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UniprotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UniprotId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let is_valid = (6..=10).contains(&normalized.len())
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-');
        if !is_valid {
            return Err(KiraError::InvalidUniprotId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_bioassay_id_with_prefix() {
        let aid: BioassayId = "AID1000".parse().unwrap();
        assert_eq!(aid.get(), 1000);
        let aid: BioassayId = " 42 ".parse().unwrap();
        assert_eq!(aid.get(), 42);
    }

    #[test]
    fn parse_bioassay_id_invalid() {
        let err = "assay".parse::<BioassayId>().unwrap_err();
        assert_matches!(err, KiraError::InvalidBioassayId(_));
    }

    #[test]
    fn accession_version_is_stripped() {
        let acc: ProteinAccession = "P12345.2".parse().unwrap();
        assert_eq!(acc.as_str(), "P12345");
        let acc: ProteinAccession = "NP_001234.1".parse().unwrap();
        assert_eq!(acc.as_str(), "NP_001234");
        let acc: ProteinAccession = "P12345".parse().unwrap();
        assert_eq!(acc.as_str(), "P12345");
    }

    #[test]
    fn accession_invalid() {
        assert_matches!(
            "".parse::<ProteinAccession>(),
            Err(KiraError::InvalidProteinAccession(_))
        );
        assert_matches!(
            ".3".parse::<ProteinAccession>(),
            Err(KiraError::InvalidProteinAccession(_))
        );
    }

    #[test]
    fn parse_uniprot_id() {
        let id: UniprotId = "p69905".parse().unwrap();
        assert_eq!(id.as_str(), "P69905");
        assert_matches!(
            "P6".parse::<UniprotId>(),
            Err(KiraError::InvalidUniprotId(_))
        );
    }
}
