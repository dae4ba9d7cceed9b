//! Rollover Data Model
//!
//! Zones, signing keys, algorithm/keytype parsing and the typed per-zone
//! rollover marker record.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MetadataStore;

/// Flags value of a Key Signing Key
pub const FLAGS_KSK: u16 = 257;
/// Flags value of a Zone Signing Key
pub const FLAGS_ZSK: u16 = 256;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// A DNS zone served by the authoritative server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: i64,
    pub name: String,
}

impl Zone {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

/// DNSSEC algorithm identifiers (IANA registry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DnssecAlgorithm {
    /// RSA/SHA-256 (Algorithm 8)
    RsaSha256 = 8,
    /// RSA/SHA-512 (Algorithm 10)
    RsaSha512 = 10,
    /// ECDSA P-256 with SHA-256 (Algorithm 13)
    EcdsaP256Sha256 = 13,
    /// ECDSA P-384 with SHA-384 (Algorithm 14)
    EcdsaP384Sha384 = 14,
    /// Ed25519 (Algorithm 15)
    Ed25519 = 15,
    /// Ed448 (Algorithm 16)
    Ed448 = 16,
}

impl DnssecAlgorithm {
    const ALL: [DnssecAlgorithm; 6] = [
        DnssecAlgorithm::RsaSha256,
        DnssecAlgorithm::RsaSha512,
        DnssecAlgorithm::EcdsaP256Sha256,
        DnssecAlgorithm::EcdsaP384Sha384,
        DnssecAlgorithm::Ed25519,
        DnssecAlgorithm::Ed448,
    ];

    /// Get the algorithm number
    pub fn number(&self) -> u8 {
        *self as u8
    }

    /// Get algorithm name as understood by the key-management API
    pub fn name(&self) -> &'static str {
        match self {
            DnssecAlgorithm::RsaSha256 => "RSASHA256",
            DnssecAlgorithm::RsaSha512 => "RSASHA512",
            DnssecAlgorithm::EcdsaP256Sha256 => "ECDSAP256SHA256",
            DnssecAlgorithm::EcdsaP384Sha384 => "ECDSAP384SHA384",
            DnssecAlgorithm::Ed25519 => "ED25519",
            DnssecAlgorithm::Ed448 => "ED448",
        }
    }

    /// Parse from algorithm number
    pub fn from_number(num: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.number() == num)
    }

    /// Parse from algorithm name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.name().eq_ignore_ascii_case(name))
    }
}

/// Algorithm of a signing key; numbers outside the table are carried as-is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyAlgorithm {
    Known(DnssecAlgorithm),
    Other(u8),
}

impl KeyAlgorithm {
    pub fn from_number(num: u8) -> Self {
        match DnssecAlgorithm::from_number(num) {
            Some(alg) => KeyAlgorithm::Known(alg),
            None => KeyAlgorithm::Other(num),
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            KeyAlgorithm::Known(alg) => alg.number(),
            KeyAlgorithm::Other(num) => *num,
        }
    }

    /// Name sent to the key-management API, `ALG<n>` for unknown numbers
    pub fn name(&self) -> String {
        match self {
            KeyAlgorithm::Known(alg) => alg.name().to_string(),
            KeyAlgorithm::Other(num) => format!("ALG{}", num),
        }
    }

    /// RSA algorithms need an explicit key size
    pub fn is_rsa(&self) -> bool {
        self.name().starts_with("RSA")
    }

    /// Extract the algorithm from DNSKEY presentation content
    /// (`<flags> <protocol> <algorithm> <public key>`).
    pub fn from_key_content(content: &str) -> Option<Self> {
        content
            .split_whitespace()
            .nth(2)
            .and_then(|token| token.parse::<u8>().ok())
            .map(Self::from_number)
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = RolloverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(alg) = DnssecAlgorithm::from_name(s) {
            return Ok(KeyAlgorithm::Known(alg));
        }
        if let Some(num) = s
            .get(..3)
            .filter(|prefix| prefix.eq_ignore_ascii_case("ALG"))
            .and_then(|_| s[3..].parse::<u8>().ok())
        {
            return Ok(KeyAlgorithm::from_number(num));
        }
        Err(RolloverError::ConfigError(format!(
            "Unknown DNSSEC algorithm: {}",
            s
        )))
    }
}

impl TryFrom<String> for KeyAlgorithm {
    type Error = RolloverError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeyAlgorithm> for String {
    fn from(alg: KeyAlgorithm) -> Self {
        alg.name()
    }
}

/// Role of a signing key, derived from its DNSKEY flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Ksk,
    Zsk,
    Csk,
}

impl KeyType {
    pub fn from_flags(flags: u16) -> Self {
        match flags {
            FLAGS_KSK => KeyType::Ksk,
            FLAGS_ZSK => KeyType::Zsk,
            _ => KeyType::Csk,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Ksk => "ksk",
            KeyType::Zsk => "zsk",
            KeyType::Csk => "csk",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = RolloverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ksk" => Ok(KeyType::Ksk),
            "zsk" => Ok(KeyType::Zsk),
            "csk" => Ok(KeyType::Csk),
            other => Err(RolloverError::ConfigError(format!(
                "Unknown key type: {} (expected ksk, zsk or csk)",
                other
            ))),
        }
    }
}

/// A signing key as stored by the authoritative server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKey {
    pub id: i64,
    pub zone_id: i64,
    pub active: bool,
    pub flags: u16,
    /// DNSKEY presentation content, third token is the algorithm number
    pub content: String,
}

impl SigningKey {
    pub fn key_type(&self) -> KeyType {
        KeyType::from_flags(self.flags)
    }

    pub fn algorithm(&self) -> Option<KeyAlgorithm> {
        KeyAlgorithm::from_key_content(&self.content)
    }
}

/// Per-zone marker kinds held in the metadata store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// Date the current key generation became the baseline
    Baseline,
    /// Timestamp at which the in-progress rollover started
    RolloverStart,
    /// Optional per-zone override of the hold period
    HoldOverride,
    /// Timestamp at which this engine deactivated the given key
    Deactivated(i64),
}

impl MarkerKind {
    pub fn as_key(&self) -> String {
        match self {
            MarkerKind::Baseline => "X-ROLLOVER-BASELINE".to_string(),
            MarkerKind::RolloverStart => "X-ROLLOVER-START".to_string(),
            MarkerKind::HoldOverride => "X-ROLLOVER-HOLD-DAYS".to_string(),
            MarkerKind::Deactivated(key_id) => format!("X-ROLLOVER-DEACTIVATED-{}", key_id),
        }
    }
}

/// A stored deactivation marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeactivationMarker {
    At(DateTime<Utc>),
    /// Marker present but its value could not be parsed
    Unreadable(String),
}

/// Typed view over the markers the phase decision reads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolloverMetadata {
    pub baseline_date: Option<NaiveDate>,
    pub rollover_start: Option<DateTime<Utc>>,
    pub hold_override_days: Option<i64>,
}

impl RolloverMetadata {
    /// Read the zone's baseline, start and hold markers.
    ///
    /// An unparseable value is a `DataError`.
    pub async fn load(store: &dyn MetadataStore, zone_id: i64) -> Result<Self, RolloverError> {
        let baseline_date = store
            .get(zone_id, &MarkerKind::Baseline.as_key())
            .await?
            .map(|raw| parse_date(&raw))
            .transpose()?;

        let rollover_start = store
            .get(zone_id, &MarkerKind::RolloverStart.as_key())
            .await?
            .map(|raw| parse_timestamp(&raw))
            .transpose()?;

        let hold_override_days = store
            .get(zone_id, &MarkerKind::HoldOverride.as_key())
            .await?
            .map(|raw| {
                raw.trim()
                    .parse::<i64>()
                    .ok()
                    .filter(|days| *days >= 0)
                    .ok_or_else(|| {
                        RolloverError::DataError(format!("Invalid hold override: {:?}", raw))
                    })
            })
            .transpose()?;

        Ok(Self {
            baseline_date,
            rollover_start,
            hold_override_days,
        })
    }

    /// Read deactivation markers for every inactive key in `keys`.
    pub async fn load_deactivations(
        store: &dyn MetadataStore,
        zone_id: i64,
        keys: &[SigningKey],
    ) -> Result<BTreeMap<i64, DeactivationMarker>, RolloverError> {
        let mut deactivations = BTreeMap::new();
        for key in keys.iter().filter(|k| !k.active) {
            if let Some(raw) = store
                .get(zone_id, &MarkerKind::Deactivated(key.id).as_key())
                .await?
            {
                let marker = match parse_timestamp(&raw) {
                    Ok(at) => DeactivationMarker::At(at),
                    Err(_) => DeactivationMarker::Unreadable(raw),
                };
                deactivations.insert(key.id, marker);
            }
        }
        Ok(deactivations)
    }
}

/// Render a timestamp the way markers store it (UTC, second precision)
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp marker. RFC 3339 values are accepted as well.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RolloverError> {
    let raw = raw.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RolloverError::DataError(format!("Invalid timestamp: {:?}", raw)))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, RolloverError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| RolloverError::DataError(format!("Invalid date: {:?}", raw)))
}

/// Rollover-specific errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RolloverError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Key management API error: {0}")]
    ClientError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Invalid marker data: {0}")]
    DataError(String),

    #[error("Zone not found: {0}")]
    ZoneNotFound(String),
}

impl RolloverError {
    /// Failures that the next scheduled run retries without intervention
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RolloverError::ClientError(_) | RolloverError::StorageError(_)
        )
    }
}
