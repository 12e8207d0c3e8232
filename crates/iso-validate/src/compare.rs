//! Scalar comparators: plain equality, amounts, currency codes, date/time
//! reconstruction, entry-mode channels, advice/reversal codes, AVS and the
//! incremental-authorization TLV.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use iso_codec::IsoMessage;
use iso_jsonpath::resolve;
use iso_types::{FieldId, strip_leading_zeros};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::FieldStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComparatorError {
    #[error("{what}: expected {expected} characters, found {actual}")]
    Length {
        what: String,
        expected: usize,
        actual: usize,
    },
    #[error("{what}: value {value:?} is not numeric")]
    NonNumeric { what: String, value: String },
    #[error("missing canonical value at {path}")]
    MissingPath { path: String },
    #[error("malformed TLV at offset {offset}: {reason}")]
    MalformedTlv { offset: usize, reason: String },
    #[error("TLV tag {tag} not present")]
    MissingTag { tag: String },
    #[error("unknown {what} code {code:?}")]
    UnknownCode { what: String, code: String },
    #[error("DE{field} has no value in the message")]
    MissingField { field: FieldId },
    #[error("invalid date/time {value:?}")]
    InvalidDateTime { value: String },
    #[error("invalid rule parameters: {0}")]
    Rule(String),
}

/// What one comparator concluded about one DE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: FieldStatus,
    /// Actual value on pass, mismatch detail on failure, reason on skip.
    pub detail: String,
    /// Replaces the message value as the recorded expectation.
    pub expected: Option<String>,
    /// Other DEs that receive the same outcome.
    pub mirrored: Vec<FieldId>,
}

impl Verdict {
    #[must_use]
    pub fn pass(detail: impl Into<String>) -> Self {
        Self::with_status(FieldStatus::Passed, detail)
    }

    #[must_use]
    pub fn fail(detail: impl Into<String>) -> Self {
        Self::with_status(FieldStatus::Failed, detail)
    }

    #[must_use]
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::with_status(FieldStatus::Skipped, reason)
    }

    fn with_status(status: FieldStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
            expected: None,
            mirrored: Vec::new(),
        }
    }
}

/// Everything a comparator may read while judging one DE.
#[derive(Debug, Clone, Copy)]
pub struct CompareContext<'a> {
    pub field: FieldId,
    pub expected: &'a str,
    pub message: &'a IsoMessage,
    pub canonical: &'a Value,
    pub reference_year: i32,
}

impl CompareContext<'_> {
    pub(crate) fn require(&self, path: &str) -> Result<String, ComparatorError> {
        resolve(self.canonical, path).ok_or_else(|| ComparatorError::MissingPath {
            path: path.to_owned(),
        })
    }
}

/// Sub-field bookkeeping shared by every multi-part comparator: matches are
/// listed on pass, only the mismatches on failure.
#[derive(Debug, Default)]
pub(crate) struct Tally {
    matched: Vec<String>,
    mismatched: Vec<String>,
}

impl Tally {
    pub(crate) fn check(&mut self, name: &str, want: &str, got: Option<&str>, eq: fn(&str, &str) -> bool) {
        match got {
            Some(got) if eq(want, got) => self.matched.push(format!("{name}={got}")),
            Some(got) => self
                .mismatched
                .push(format!("{name}: expected {want:?}, actual {got:?}")),
            None => self
                .mismatched
                .push(format!("{name}: expected {want:?}, actual missing")),
        }
    }

    pub(crate) fn mismatch(&mut self, detail: String) {
        self.mismatched.push(detail);
    }

    pub(crate) fn into_verdict(self) -> Verdict {
        if self.mismatched.is_empty() {
            Verdict::pass(self.matched.join(", "))
        } else {
            Verdict::fail(self.mismatched.join("; "))
        }
    }
}

pub(crate) fn exact_eq(want: &str, got: &str) -> bool {
    want == got
}

pub(crate) fn trimmed_eq(want: &str, got: &str) -> bool {
    want.trim() == got.trim()
}

pub(crate) fn caseless_eq(want: &str, got: &str) -> bool {
    want.trim().eq_ignore_ascii_case(got.trim())
}

pub(crate) fn numeric_eq(want: &str, got: &str) -> bool {
    strip_leading_zeros(want) == strip_leading_zeros(got)
}

pub(crate) fn prefix_eq(want: &str, got: &str) -> bool {
    got.trim().starts_with(want)
}

/// `count` characters starting at character `start`.
pub(crate) fn take<'v>(
    value: &'v str,
    start: usize,
    count: usize,
    what: &str,
) -> Result<&'v str, ComparatorError> {
    let available = value.chars().count();
    let stop = start.saturating_add(count);
    if stop > available {
        return Err(ComparatorError::Length {
            what: what.to_owned(),
            expected: stop,
            actual: available,
        });
    }
    let begin = byte_offset(value, start);
    let end = byte_offset(value, stop);
    Ok(&value[begin..end])
}

fn byte_offset(value: &str, chars: usize) -> usize {
    value
        .char_indices()
        .nth(chars)
        .map_or(value.len(), |(idx, _)| idx)
}

pub(crate) fn require_digits<'v>(value: &'v str, what: &str) -> Result<&'v str, ComparatorError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ComparatorError::NonNumeric {
            what: what.to_owned(),
            value: value.to_owned(),
        });
    }
    Ok(trimmed)
}

/// `MMDDhhmmss` -> `YYYY-MM-DDThh:mm:ss` in `year`.
pub(crate) fn reconstruct_datetime(value: &str, year: i32) -> Result<String, ComparatorError> {
    let digits = require_digits(value, "date/time")?;
    if digits.len() != 10 {
        return Err(ComparatorError::Length {
            what: "date/time MMDDhhmmss".to_owned(),
            expected: 10,
            actual: digits.len(),
        });
    }
    let part = |range: std::ops::Range<usize>| digits[range].parse::<u32>().unwrap_or(u32::MAX);
    NaiveDate::from_ymd_opt(year, part(0..2), part(2..4))
        .and_then(|date| date.and_hms_opt(part(4..6), part(6..8), part(8..10)))
        .map(|stamp| stamp.format("%Y-%m-%dT%H:%M:%S").to_string())
        .ok_or_else(|| ComparatorError::InvalidDateTime {
            value: value.to_owned(),
        })
}

/// `MMDD` -> `YYYY-MM-DD` in `year`.
pub(crate) fn reconstruct_month_day(value: &str, year: i32) -> Result<String, ComparatorError> {
    let digits = require_digits(value, "month/day")?;
    let parsed = (digits.len() == 4)
        .then(|| {
            let month = digits[0..2].parse::<u32>().ok()?;
            let day = digits[2..4].parse::<u32>().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        })
        .flatten();
    parsed
        .map(|date| date.format("%Y-%m-%d").to_string())
        .ok_or_else(|| ComparatorError::InvalidDateTime {
            value: value.to_owned(),
        })
}

/// `YYMMDD` -> `20YY-MM-DD`.
pub(crate) fn reconstruct_short_date(value: &str) -> Result<String, ComparatorError> {
    let digits = require_digits(value, "date YYMMDD")?;
    let parsed = (digits.len() == 6)
        .then(|| {
            let year = 2000 + digits[0..2].parse::<i32>().ok()?;
            let month = digits[2..4].parse::<u32>().ok()?;
            let day = digits[4..6].parse::<u32>().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        })
        .flatten();
    parsed
        .map(|date| date.format("%Y-%m-%d").to_string())
        .ok_or_else(|| ComparatorError::InvalidDateTime {
            value: value.to_owned(),
        })
}

pub(crate) fn lookup<'t>(
    table: &'t BTreeMap<String, String>,
    code: &str,
    what: &str,
) -> Result<&'t str, ComparatorError> {
    table
        .get(code)
        .or_else(|| table.get(code.trim()))
        .map(String::as_str)
        .ok_or_else(|| ComparatorError::UnknownCode {
            what: what.to_owned(),
            code: code.to_owned(),
        })
}

pub(crate) fn owned_table(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(code, value)| ((*code).to_owned(), (*value).to_owned()))
        .collect()
}

/// Field reference written either as `"13"` or `13` in rule JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawFieldId {
    Number(u32),
    Text(String),
}

impl RawFieldId {
    pub(crate) fn resolve(&self) -> Result<FieldId, ComparatorError> {
        match self {
            Self::Number(number) => FieldId::new(*number),
            Self::Text(text) => FieldId::parse_loose(text),
        }
        .map_err(|err| ComparatorError::Rule(err.to_string()))
    }
}

// --- equality ---------------------------------------------------------------

pub(crate) fn compare_equality(
    ctx: &CompareContext<'_>,
    path: Option<&str>,
    skip_reason: &str,
) -> Result<Verdict, ComparatorError> {
    let Some(path) = path else {
        return Ok(Verdict::skip(skip_reason));
    };
    let actual = ctx.require(path)?;
    if actual == ctx.expected {
        Ok(Verdict::pass(actual))
    } else {
        Ok(Verdict::fail(format!(
            "{path}: expected {:?}, actual {actual:?}",
            ctx.expected
        )))
    }
}

// --- amount / currency --------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AmountParams {
    path: String,
    #[serde(default)]
    indicator_path: Option<String>,
    #[serde(default)]
    indicator_map: BTreeMap<String, String>,
    #[serde(default)]
    has_indicator: Option<bool>,
}

#[derive(Debug, Clone)]
pub(crate) struct AmountRule {
    path: String,
    /// Canonical indicator node and the code table it is checked through.
    indicator: Option<(String, BTreeMap<String, String>)>,
    has_indicator: Option<bool>,
}

impl TryFrom<AmountParams> for AmountRule {
    type Error = ComparatorError;

    fn try_from(params: AmountParams) -> Result<Self, Self::Error> {
        let indicator = match (params.indicator_path, params.indicator_map.is_empty()) {
            (Some(path), false) => Some((path, params.indicator_map)),
            (None, false) => {
                return Err(ComparatorError::Rule(
                    "indicatorMap requires indicatorPath".to_owned(),
                ));
            }
            (_, true) => None,
        };
        Ok(Self {
            path: params.path,
            indicator,
            has_indicator: params.has_indicator,
        })
    }
}

impl AmountRule {
    pub(crate) fn compare(&self, ctx: &CompareContext<'_>) -> Result<Verdict, ComparatorError> {
        let has_indicator = self
            .has_indicator
            .unwrap_or_else(|| (28..=31).contains(&ctx.field.number()));
        let expected = ctx.expected.trim();
        let (indicator, digits) = if has_indicator {
            let mut chars = expected.chars();
            let indicator = chars.next().map(String::from);
            (indicator, chars.as_str())
        } else {
            (None, expected)
        };
        let want = strip_leading_zeros(require_digits(digits, "amount")?);

        let mut tally = Tally::default();
        let actual = ctx.require(&self.path)?;
        tally.check("amount", want, Some(&actual), numeric_eq);

        if let (Some(indicator), Some((indicator_path, indicator_map))) =
            (indicator, &self.indicator)
        {
            match indicator_map.get(&indicator) {
                Some(kind) => {
                    let got = resolve(ctx.canonical, indicator_path);
                    tally.check("indicator", kind, got.as_deref(), caseless_eq);
                }
                None => tally.mismatch(format!("indicator: unknown code {indicator:?}")),
            }
        }
        Ok(tally.into_verdict())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PathRule {
    path: String,
}

impl PathRule {
    pub(crate) fn compare_currency(
        &self,
        ctx: &CompareContext<'_>,
    ) -> Result<Verdict, ComparatorError> {
        let want = require_digits(ctx.expected, "currency code")?;
        let actual = ctx.require(&self.path)?;
        let mut tally = Tally::default();
        tally.check("currency", strip_leading_zeros(want), Some(&actual), numeric_eq);
        Ok(tally.into_verdict())
    }

    pub(crate) fn compare_datetime(
        &self,
        ctx: &CompareContext<'_>,
    ) -> Result<Verdict, ComparatorError> {
        let want = reconstruct_datetime(ctx.expected, ctx.reference_year)?;
        let actual = ctx.require(&self.path)?;
        let mut tally = Tally::default();
        tally.check("datetime", &want, Some(&actual), prefix_eq);
        Ok(tally.into_verdict())
    }
}

// --- paired date + time -----------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PairedDatetimeParams {
    date_field: RawFieldId,
    time_field: RawFieldId,
    path: String,
}

#[derive(Debug, Clone)]
pub(crate) struct PairedDatetimeRule {
    date_field: FieldId,
    time_field: FieldId,
    path: String,
}

impl TryFrom<PairedDatetimeParams> for PairedDatetimeRule {
    type Error = ComparatorError;

    fn try_from(params: PairedDatetimeParams) -> Result<Self, Self::Error> {
        Ok(Self {
            date_field: params.date_field.resolve()?,
            time_field: params.time_field.resolve()?,
            path: params.path,
        })
    }
}

impl PairedDatetimeRule {
    pub(crate) fn compare(&self, ctx: &CompareContext<'_>) -> Result<Verdict, ComparatorError> {
        let date = ctx
            .message
            .field(self.date_field)
            .ok_or(ComparatorError::MissingField {
                field: self.date_field,
            })?;
        let time = ctx
            .message
            .field(self.time_field)
            .ok_or(ComparatorError::MissingField {
                field: self.time_field,
            })?;
        let date = take(date.trim(), 0, 4, "date MMDD")?;
        let time = take(time.trim(), 0, 6, "time hhmmss")?;
        let combined = format!("{date}{time}");

        let want = reconstruct_datetime(&combined, ctx.reference_year)?;
        let actual = ctx.require(&self.path)?;
        let mut tally = Tally::default();
        tally.check("datetime", &want, Some(&actual), prefix_eq);

        let mut verdict = tally.into_verdict();
        verdict.expected = Some(combined);
        verdict.mirrored = [self.date_field, self.time_field]
            .into_iter()
            .filter(|field| *field != ctx.field)
            .collect();
        Ok(verdict)
    }
}

// --- POS entry mode ---------------------------------------------------------

/// PAN entry mode (first two digits of the code) to channel bucket.
const ENTRY_MODE_CHANNELS: [(&str, &str); 15] = [
    ("00", "POS"),
    ("01", "ONLINE"),
    ("02", "POS"),
    ("03", "POS"),
    ("04", "POS"),
    ("05", "POS"),
    ("07", "POS"),
    ("09", "ONLINE"),
    ("10", "ONLINE"),
    ("79", "POS"),
    ("80", "POS"),
    ("81", "ONLINE"),
    ("90", "POS"),
    ("91", "POS"),
    ("95", "POS"),
];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PosEntryModeRule {
    path: String,
    #[serde(default)]
    channels: BTreeMap<String, String>,
}

impl PosEntryModeRule {
    pub(crate) fn compare(&self, ctx: &CompareContext<'_>) -> Result<Verdict, ComparatorError> {
        let code = require_digits(ctx.expected, "entry mode")?;
        let want = entry_mode_channel(code, &self.channels)?;
        let actual = ctx.require(&self.path)?;
        let mut tally = Tally::default();
        tally.check("channel", want, Some(&actual), caseless_eq);
        Ok(tally.into_verdict())
    }
}

pub(crate) fn entry_mode_channel<'t>(
    code: &str,
    overrides: &'t BTreeMap<String, String>,
) -> Result<&'t str, ComparatorError> {
    if let Some(channel) = overrides.get(code) {
        return Ok(channel.as_str());
    }
    let pan_mode = take(code, 0, 2, "entry mode")?;
    if let Some(channel) = overrides.get(pan_mode) {
        return Ok(channel.as_str());
    }
    ENTRY_MODE_CHANNELS
        .iter()
        .find(|(mode, _)| *mode == pan_mode)
        .map(|(_, channel)| *channel)
        .ok_or_else(|| ComparatorError::UnknownCode {
            what: "entry mode".to_owned(),
            code: code.to_owned(),
        })
}

// --- advice / reversal ------------------------------------------------------

const REVERSAL_TYPE: &str = "80";
const ADVICE_TYPE: &str = "40";

const REVERSAL_REASONS: [(&str, &str); 6] = [
    ("00", "UNSPECIFIED"),
    ("01", "CUSTOMER_CANCELLATION"),
    ("02", "TIMEOUT"),
    ("03", "SYSTEM_MALFUNCTION"),
    ("04", "LATE_RESPONSE"),
    ("05", "SUSPECTED_MALFUNCTION"),
];

const ADVICE_REASONS: [(&str, &str); 5] = [
    ("00", "UNSPECIFIED"),
    ("01", "STAND_IN_PROCESSING"),
    ("02", "PARTIAL_APPROVAL"),
    ("03", "TIMEOUT"),
    ("04", "ISSUER_UNAVAILABLE"),
];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AdviceReversalParams {
    #[serde(default)]
    type_path: Option<String>,
    reason_path: String,
    #[serde(default)]
    reversal_reasons: BTreeMap<String, String>,
    #[serde(default)]
    advice_reasons: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub(crate) struct AdviceReversalRule {
    type_path: Option<String>,
    reason_path: String,
    reversal_reasons: BTreeMap<String, String>,
    advice_reasons: BTreeMap<String, String>,
}

impl From<AdviceReversalParams> for AdviceReversalRule {
    fn from(params: AdviceReversalParams) -> Self {
        let mut reversal_reasons = owned_table(&REVERSAL_REASONS);
        reversal_reasons.extend(params.reversal_reasons);
        let mut advice_reasons = owned_table(&ADVICE_REASONS);
        advice_reasons.extend(params.advice_reasons);
        Self {
            type_path: params.type_path,
            reason_path: params.reason_path,
            reversal_reasons,
            advice_reasons,
        }
    }
}

impl AdviceReversalRule {
    pub(crate) fn compare(&self, ctx: &CompareContext<'_>) -> Result<Verdict, ComparatorError> {
        let expected = ctx.expected.trim();
        let type_code = take(expected, 0, 2, "advice/reversal type")?;
        let reason_code = take(expected, 2, 2, "advice/reversal reason")?;

        let (kind, table) = match type_code {
            REVERSAL_TYPE => ("REVERSAL", &self.reversal_reasons),
            ADVICE_TYPE => ("ADVICE", &self.advice_reasons),
            other => {
                return Err(ComparatorError::UnknownCode {
                    what: "advice/reversal type".to_owned(),
                    code: other.to_owned(),
                });
            }
        };

        let mut tally = Tally::default();
        if let Some(type_path) = &self.type_path {
            let got = resolve(ctx.canonical, type_path);
            tally.check("type", kind, got.as_deref(), caseless_eq);
        }
        match lookup(table, reason_code, "reason") {
            Ok(reason) => {
                let got = resolve(ctx.canonical, &self.reason_path);
                tally.check("reason", reason, got.as_deref(), caseless_eq);
            }
            Err(err) => tally.mismatch(format!("reason: {err}")),
        }
        Ok(tally.into_verdict())
    }
}

// --- AVS --------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AvsRule {
    prefix: String,
    zip_path: String,
}

impl AvsRule {
    pub(crate) fn compare(&self, ctx: &CompareContext<'_>) -> Result<Verdict, ComparatorError> {
        let expected = ctx.expected;
        let prefix = take(expected, 0, 4, "AVS prefix")?;
        let declared = require_digits(take(expected, 4, 2, "AVS zip length")?, "AVS zip length")?;
        let zip_len = declared.parse::<usize>().map_err(|_| ComparatorError::NonNumeric {
            what: "AVS zip length".to_owned(),
            value: declared.to_owned(),
        })?;
        let zip = take(expected, 6, zip_len, "AVS zip")?;

        let mut tally = Tally::default();
        tally.check("prefix", &self.prefix, Some(prefix), exact_eq);
        let got = resolve(ctx.canonical, &self.zip_path);
        tally.check("zip", zip.trim(), got.as_deref(), caseless_eq);
        Ok(tally.into_verdict())
    }
}

// --- incremental authorization TLV --------------------------------------------

const COUNT_TAG: &str = "CN";
const SEQUENCE_TAG: &str = "SN";

fn default_auth_type() -> String {
    "MULTIPLE_COMPLETION".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IncrementalAuthRule {
    count_path: String,
    sequence_path: String,
    #[serde(default)]
    auth_type_path: Option<String>,
    #[serde(default = "default_auth_type")]
    auth_type: String,
    #[serde(default)]
    mti: Option<String>,
}

impl IncrementalAuthRule {
    pub(crate) fn compare(
        &self,
        ctx: &CompareContext<'_>,
        skip_reason: &str,
    ) -> Result<Verdict, ComparatorError> {
        if let Some(mti) = &self.mti
            && ctx.message.mti().is_none_or(|actual| actual.trim() != mti.trim())
        {
            return Ok(Verdict::skip(skip_reason));
        }

        let tags = parse_tlv(ctx.expected.trim())?;
        let tag = |name: &str| {
            tags.get(name)
                .map(String::as_str)
                .ok_or_else(|| ComparatorError::MissingTag {
                    tag: name.to_owned(),
                })
        };
        let count = require_digits(tag(COUNT_TAG)?, "incremental count")?;
        let sequence = require_digits(tag(SEQUENCE_TAG)?, "incremental sequence")?;

        let mut tally = Tally::default();
        let got = resolve(ctx.canonical, &self.count_path);
        tally.check("count", count, got.as_deref(), numeric_eq);
        let got = resolve(ctx.canonical, &self.sequence_path);
        tally.check("sequence", sequence, got.as_deref(), numeric_eq);
        if let Some(path) = &self.auth_type_path {
            let got = resolve(ctx.canonical, path);
            tally.check("authType", &self.auth_type, got.as_deref(), caseless_eq);
        }
        Ok(tally.into_verdict())
    }
}

/// Repeated `[tag:2][len:2][value:len]` until the input is exhausted.
pub fn parse_tlv(input: &str) -> Result<BTreeMap<String, String>, ComparatorError> {
    let mut tags = BTreeMap::new();
    let total = input.chars().count();
    let mut offset = 0;
    while offset < total {
        let malformed = |reason: &str| ComparatorError::MalformedTlv {
            offset,
            reason: reason.to_owned(),
        };
        let tag = take(input, offset, 2, "TLV tag").map_err(|_| malformed("truncated tag"))?;
        let len_text =
            take(input, offset + 2, 2, "TLV length").map_err(|_| malformed("truncated length"))?;
        if !len_text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed("length is not decimal"));
        }
        let len = len_text
            .parse::<usize>()
            .map_err(|_| malformed("length is not decimal"))?;
        let value =
            take(input, offset + 4, len, "TLV value").map_err(|_| malformed("value overruns input"))?;
        tags.insert(tag.to_owned(), value.to_owned());
        offset += 4 + len;
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{
        ComparatorError, entry_mode_channel, parse_tlv, reconstruct_datetime,
        reconstruct_month_day, reconstruct_short_date, take,
    };

    #[test]
    fn datetime_reconstruction_uses_reference_year() {
        assert_eq!(
            reconstruct_datetime("0715143000", 2026).expect("valid"),
            "2026-07-15T14:30:00"
        );
        assert!(matches!(
            reconstruct_datetime("1345143000", 2026),
            Err(ComparatorError::InvalidDateTime { .. })
        ));
        assert!(matches!(
            reconstruct_datetime("07151430", 2026),
            Err(ComparatorError::Length { .. })
        ));
        assert_eq!(reconstruct_month_day("0229", 2028).expect("leap"), "2028-02-29");
        assert_eq!(reconstruct_short_date("260131").expect("short"), "2026-01-31");
    }

    #[test]
    fn tlv_stream_parses_until_exhausted() {
        let tags = parse_tlv("CN0203SN0201XX00").expect("tlv");
        assert_eq!(tags.get("CN").map(String::as_str), Some("03"));
        assert_eq!(tags.get("SN").map(String::as_str), Some("01"));
        assert_eq!(tags.get("XX").map(String::as_str), Some(""));

        assert!(matches!(
            parse_tlv("CN0503"),
            Err(ComparatorError::MalformedTlv { offset: 0, .. })
        ));
        assert!(matches!(
            parse_tlv("CN0203S"),
            Err(ComparatorError::MalformedTlv { offset: 6, .. })
        ));
        assert!(parse_tlv("CNx103").is_err());
    }

    #[test]
    fn entry_mode_channel_uses_pan_entry_digits() {
        let none = BTreeMap::new();
        assert_eq!(entry_mode_channel("090", &none).expect("09"), "ONLINE");
        assert_eq!(entry_mode_channel("901", &none).expect("90"), "POS");
        assert_eq!(entry_mode_channel("051", &none).expect("05"), "POS");
        assert_eq!(entry_mode_channel("810", &none).expect("81"), "ONLINE");
        assert!(entry_mode_channel("660", &none).is_err());

        let overrides = BTreeMap::from([("660".to_owned(), "ONLINE".to_owned())]);
        assert_eq!(entry_mode_channel("660", &overrides).expect("override"), "ONLINE");
    }

    #[test]
    fn take_reports_short_input() {
        assert_eq!(take("ABCDEF", 2, 3, "x").expect("slice"), "CDE");
        assert!(matches!(
            take("ABC", 2, 3, "x"),
            Err(ComparatorError::Length {
                expected: 5,
                actual: 3,
                ..
            })
        ));
        assert!(matches!(
            take("ABC", 2, usize::MAX, "x"),
            Err(ComparatorError::Length {
                expected: usize::MAX,
                actual: 3,
                ..
            })
        ));
    }
}
