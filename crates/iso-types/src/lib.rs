#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_FIELD_NUMBER: u8 = 128;
pub const DEFAULT_MTI: &str = "0100";
pub const DEFAULT_SKIP_REASON: &str = "Field is not canonicalized";

const COMMENT_MARKERS: [&str; 2] = ["#", "//"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldIdError {
    #[error("field id {raw:?} is not numeric")]
    NotNumeric { raw: String },
    #[error("field number {number} is outside 0..=128")]
    OutOfRange { number: u32 },
}

/// Field number inside a message: 0 is the MTI, 1..=128 are data elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldId(u8);

impl FieldId {
    pub const MTI: Self = Self(0);

    pub fn new(number: u32) -> Result<Self, FieldIdError> {
        if number > u32::from(MAX_FIELD_NUMBER) {
            return Err(FieldIdError::OutOfRange { number });
        }
        Ok(Self(number as u8))
    }

    /// Accepts `"4"`, `"004"`, `"DE4"` and `"de-004"` spellings.
    pub fn parse_loose(raw: &str) -> Result<Self, FieldIdError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("DE")
            .or_else(|| trimmed.strip_prefix("de"))
            .or_else(|| trimmed.strip_prefix("De"))
            .map(|rest| rest.trim_start_matches(['-', '_', ' ']))
            .unwrap_or(trimmed);
        digits.parse()
    }

    #[must_use]
    pub fn number(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn is_mti(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn is_primary(self) -> bool {
        (1..=64).contains(&self.0)
    }

    #[must_use]
    pub fn is_secondary(self) -> bool {
        (65..=128).contains(&self.0)
    }

    #[must_use]
    pub fn label(self) -> String {
        if self.is_mti() {
            "MTI".to_owned()
        } else {
            format!("DE{}", self.0)
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FieldId {
    type Err = FieldIdError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FieldIdError::NotNumeric {
                raw: raw.to_owned(),
            });
        }
        let number = trimmed
            .parse::<u32>()
            .map_err(|_| FieldIdError::OutOfRange { number: u32::MAX })?;
        Self::new(number)
    }
}

impl TryFrom<String> for FieldId {
    type Error = FieldIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldId> for String {
    fn from(value: FieldId) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldFormat {
    #[default]
    Fixed,
    Llvar,
    Lllvar,
}

impl FieldFormat {
    /// Width of the decimal length prefix emitted on the wire.
    #[must_use]
    pub fn prefix_len(self) -> usize {
        match self {
            Self::Fixed => 0,
            Self::Llvar => 2,
            Self::Lllvar => 3,
        }
    }

    /// Largest value length the prefix can express.
    #[must_use]
    pub fn prefix_capacity(self) -> usize {
        match self {
            Self::Fixed => usize::MAX,
            Self::Llvar => 99,
            Self::Lllvar => 999,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fixed => "FIXED",
            Self::Llvar => "LLVAR",
            Self::Lllvar => "LLLVAR",
        }
    }
}

impl TryFrom<String> for FieldFormat {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FIXED" | "F" | "" => Ok(Self::Fixed),
            "LLVAR" | "LL" => Ok(Self::Llvar),
            "LLLVAR" | "LLL" => Ok(Self::Lllvar),
            other => Err(format!("unsupported field format: {other}")),
        }
    }
}

impl From<FieldFormat> for String {
    fn from(value: FieldFormat) -> Self {
        value.as_str().to_owned()
    }
}

/// Semantic type tag. Only used for consistency warnings and default-value
/// generation; it never blocks processing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    Numeric,
    Alpha,
    #[default]
    Alphanumeric,
    AlphanumericSpecial,
    Binary,
    Other(String),
}

impl DataType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Numeric => "numeric",
            Self::Alpha => "alpha",
            Self::Alphanumeric => "alphanumeric",
            Self::AlphanumericSpecial => "ans",
            Self::Binary => "binary",
            Self::Other(raw) => raw,
        }
    }
}

impl From<&str> for DataType {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "n" | "numeric" | "number" | "integer" => Self::Numeric,
            "a" | "alpha" | "alphabetic" => Self::Alpha,
            "an" | "alphanumeric" | "string" => Self::Alphanumeric,
            "ans" | "alphanumericspecial" | "alphanumeric_special" => Self::AlphanumericSpecial,
            "b" | "binary" | "hex" => Self::Binary,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<String> for DataType {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.as_str().to_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    #[default]
    #[serde(alias = "default", alias = "equals", alias = "exact")]
    Equality,
    Amount,
    Currency,
    #[serde(alias = "date_time")]
    Datetime,
    #[serde(alias = "paired_date_time", alias = "datetime_pair")]
    PairedDatetime,
    MerchantLocation,
    PosEntryMode,
    PosConditionCode,
    OriginalData,
    AdditionalFees,
    AdditionalAmounts,
    ReplacementAmounts,
    NationalPosGeographicData,
    NetworkData,
    AvsData,
    AcquirerTraceData,
    IssuerTraceData,
    IncrementalAuthData,
    AdviceReversalCode,
    AdditionalData,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRule {
    #[serde(default)]
    pub kind: RuleKind,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub skip_reason: Option<String>,
    #[serde(default)]
    pub required_mti: Option<String>,
    #[serde(default)]
    pub rules: serde_json::Value,
}

impl ValidationRule {
    /// Configured reason, then the legacy `rules.mti.skipReason` slot, then
    /// the stock message.
    #[must_use]
    pub fn skip_reason(&self) -> &str {
        self.skip_reason
            .as_deref()
            .or_else(|| {
                self.rules
                    .get("mti")
                    .and_then(|mti| mti.get("skipReason"))
                    .and_then(serde_json::Value::as_str)
            })
            .unwrap_or(DEFAULT_SKIP_REASON)
    }

    /// `true` when the rule's MTI restriction (if any) admits `mti`.
    #[must_use]
    pub fn applies_to_mti(&self, mti: &str) -> bool {
        self.required_mti
            .as_deref()
            .is_none_or(|required| required.trim() == mti.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub format: FieldFormat,
    #[serde(default)]
    pub length: usize,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub canonical_paths: Vec<String>,
    #[serde(default, alias = "validationRule")]
    pub validation: Option<ValidationRule>,
}

impl FieldDefinition {
    /// Truncation bound: `maxLength`, else `length`, capped by what the length
    /// prefix can express. Zero means unbounded.
    #[must_use]
    pub fn effective_max_length(&self) -> usize {
        let configured = match self.max_length.unwrap_or(self.length) {
            0 => usize::MAX,
            bound => bound,
        };
        configured.min(self.format.prefix_capacity())
    }

    /// Canonical paths with blanks and commented-out entries removed.
    pub fn usable_canonical_paths(&self) -> impl Iterator<Item = &str> {
        self.canonical_paths
            .iter()
            .map(|path| path.trim())
            .filter(|path| !path.is_empty() && !is_commented(path))
    }

    #[must_use]
    pub fn rule_kind(&self) -> RuleKind {
        self.validation
            .as_ref()
            .map(|rule| rule.kind)
            .unwrap_or_default()
    }
}

fn is_commented(path: &str) -> bool {
    COMMENT_MARKERS.iter().any(|marker| path.contains(marker))
}

/// `"000100"` -> `"100"`, `"0000"` -> `"0"`, `""` -> `""`.
#[must_use]
pub fn strip_leading_zeros(value: &str) -> &str {
    let trimmed = value.trim();
    let stripped = trimmed.trim_start_matches('0');
    if stripped.is_empty() && !trimmed.is_empty() {
        "0"
    } else {
        stripped
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DEFAULT_SKIP_REASON, DataType, FieldDefinition, FieldFormat, FieldId, FieldIdError,
        RuleKind, ValidationRule, strip_leading_zeros,
    };
    use serde_json::json;

    #[test]
    fn field_id_rejects_non_numeric_and_out_of_range() {
        assert_eq!("4".parse::<FieldId>().expect("de4").number(), 4);
        assert!(matches!(
            "PAN".parse::<FieldId>(),
            Err(FieldIdError::NotNumeric { .. })
        ));
        assert!(matches!(
            "129".parse::<FieldId>(),
            Err(FieldIdError::OutOfRange { number: 129 })
        ));
        assert_eq!(FieldId::parse_loose("DE-004").expect("loose"), FieldId::new(4).expect("4"));
    }

    #[test]
    fn field_id_orders_mti_first() {
        let mut ids = vec![
            FieldId::new(70).expect("70"),
            FieldId::MTI,
            FieldId::new(3).expect("3"),
        ];
        ids.sort();
        assert_eq!(ids[0], FieldId::MTI);
        assert_eq!(ids[2].number(), 70);
        assert_eq!(FieldId::MTI.label(), "MTI");
    }

    #[test]
    fn definition_deserializes_camel_case_config() {
        let definition: FieldDefinition = serde_json::from_value(json!({
            "name": "primaryAccountNumber",
            "format": "llvar",
            "length": 19,
            "maxLength": 19,
            "dataType": "n",
            "active": true,
            "canonicalPaths": ["card.pan", "# card.legacyPan", ""],
            "validationRule": {"kind": "amount", "requiredMti": "0200"}
        }))
        .expect("definition");

        assert_eq!(definition.format, FieldFormat::Llvar);
        assert_eq!(definition.data_type, DataType::Numeric);
        assert_eq!(
            definition.usable_canonical_paths().collect::<Vec<_>>(),
            vec!["card.pan"]
        );
        assert_eq!(definition.rule_kind(), RuleKind::Amount);
    }

    #[test]
    fn effective_max_length_is_capped_by_prefix_width() {
        let definition = FieldDefinition {
            format: FieldFormat::Llvar,
            length: 150,
            ..FieldDefinition::default()
        };
        assert_eq!(definition.effective_max_length(), 99);

        let fixed = FieldDefinition {
            length: 12,
            ..FieldDefinition::default()
        };
        assert_eq!(fixed.effective_max_length(), 12);
    }

    #[test]
    fn skip_reason_falls_back_through_legacy_slot() {
        let legacy = ValidationRule {
            rules: json!({"mti": {"skipReason": "Only on advices"}}),
            ..ValidationRule::default()
        };
        assert_eq!(legacy.skip_reason(), "Only on advices");
        assert_eq!(ValidationRule::default().skip_reason(), DEFAULT_SKIP_REASON);

        let restricted = ValidationRule {
            required_mti: Some("0220".to_owned()),
            ..ValidationRule::default()
        };
        assert!(!restricted.applies_to_mti("0100"));
        assert!(restricted.applies_to_mti("0220"));
    }

    #[test]
    fn strip_leading_zeros_keeps_single_zero() {
        assert_eq!(strip_leading_zeros("000010000"), "10000");
        assert_eq!(strip_leading_zeros("0000"), "0");
        assert_eq!(strip_leading_zeros(""), "");
    }
}
