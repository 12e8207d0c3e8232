//! Fixed-width record decomposition. Every positional rule kind is a static
//! layout table plus the shared comparison loop in [`RecordRule::compare`].

use std::collections::BTreeMap;

use iso_jsonpath::{resolve, resolve_node};
use serde::Deserialize;
use serde_json::Value;

use crate::compare::{
    CompareContext, ComparatorError, Tally, Verdict, caseless_eq, lookup, numeric_eq, owned_table,
    prefix_eq, reconstruct_datetime, reconstruct_month_day, reconstruct_short_date, take,
    trimmed_eq,
};

type CodeTable = &'static [(&'static str, &'static str)];

#[derive(Debug, Clone, Copy)]
pub(crate) enum Part {
    Text,
    Caseless,
    Numeric,
    /// Code mapped through a table; an empty table compares the raw code.
    Code(CodeTable),
    MonthDay,
    ShortDate,
    DateTime,
    Reserved,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PartDef {
    pub name: &'static str,
    pub start: usize,
    pub len: usize,
    pub path: &'static str,
    pub part: Part,
}

const fn part(name: &'static str, start: usize, len: usize, path: &'static str, part: Part) -> PartDef {
    PartDef {
        name,
        start,
        len,
        path,
        part,
    }
}

#[derive(Debug)]
pub(crate) struct RecordLayout {
    pub what: &'static str,
    pub default_base: &'static str,
    pub record_len: usize,
    /// Repeating layouts compare record `i` with element `i` of a canonical
    /// array.
    pub repeating: bool,
    pub parts: &'static [PartDef],
}

const CREDIT_DEBIT: CodeTable = &[("C", "CREDIT"), ("D", "DEBIT"), ("0", "CREDIT"), ("1", "DEBIT")];
const YES_NO: CodeTable = &[("Y", "true"), ("N", "false"), ("1", "true"), ("0", "false")];
const NO_TABLE: CodeTable = &[];

const MESSAGE_TYPES: CodeTable = &[
    ("0100", "AUTHORIZATION"),
    ("0110", "AUTHORIZATION_RESPONSE"),
    ("0120", "AUTHORIZATION_ADVICE"),
    ("0200", "FINANCIAL"),
    ("0210", "FINANCIAL_RESPONSE"),
    ("0220", "FINANCIAL_ADVICE"),
    ("0400", "REVERSAL"),
    ("0420", "REVERSAL_ADVICE"),
];

const ACQUIRER_FORMATS: CodeTable = &[("1", "ACQUIRER_REFERENCE"), ("2", "NETWORK_REFERENCE")];
const ISSUER_FORMATS: CodeTable = &[("1", "ISSUER_REFERENCE"), ("2", "NETWORK_REFERENCE")];
const LIFECYCLE: CodeTable = &[("0", "NOT_SUPPORTED"), ("1", "SUPPORTED")];
const SERVICE_LEVELS: CodeTable = &[
    ("1", "INTERREGIONAL"),
    ("2", "INTRAREGIONAL"),
    ("3", "INTERCOUNTRY"),
    ("4", "INTRACOUNTRY"),
    ("8", "MEMBER_TO_MEMBER"),
];
const CONVERSION_RATES: CodeTable = &[("A", "ACTUAL"), ("S", "STANDARD"), ("N", "NONE")];
const AUTHORIZATION_SOURCES: CodeTable = &[("1", "ISSUER"), ("2", "STAND_IN"), ("3", "NETWORK")];

pub(crate) static MERCHANT_LOCATION: RecordLayout = RecordLayout {
    what: "merchant location",
    default_base: "merchant.location",
    record_len: 40,
    repeating: false,
    parts: &[
        part("name", 0, 23, "name", Part::Caseless),
        part("city", 23, 13, "city", Part::Caseless),
        part("state", 36, 2, "state", Part::Caseless),
        part("country", 38, 2, "country", Part::Caseless),
    ],
};

pub(crate) static NATIONAL_POS_GEOGRAPHIC_DATA: RecordLayout = RecordLayout {
    what: "national POS geographic data",
    default_base: "merchant.geographicData",
    record_len: 17,
    repeating: false,
    parts: &[
        part("state", 0, 2, "state", Part::Caseless),
        part("county", 2, 3, "county", Part::Text),
        part("postalCode", 5, 9, "postalCode", Part::Caseless),
        part("country", 14, 3, "country", Part::Text),
    ],
};

pub(crate) static NETWORK_DATA: RecordLayout = RecordLayout {
    what: "network data",
    default_base: "network",
    record_len: 18,
    repeating: false,
    parts: &[
        part("networkCode", 0, 3, "networkCode", Part::Caseless),
        part("referenceNumber", 3, 9, "referenceNumber", Part::Text),
        part("settlementDate", 12, 4, "settlementDate", Part::MonthDay),
        part("settlementFlag", 16, 1, "settlementFlag", Part::Code(YES_NO)),
        part("partialAuthFlag", 17, 1, "partialAuthFlag", Part::Code(YES_NO)),
    ],
};

pub(crate) static ORIGINAL_DATA: RecordLayout = RecordLayout {
    what: "original data elements",
    default_base: "originalData",
    record_len: 42,
    repeating: false,
    parts: &[
        part("messageType", 0, 4, "messageType", Part::Code(MESSAGE_TYPES)),
        part("stan", 4, 6, "stan", Part::Numeric),
        part("transmissionDateTime", 10, 10, "transmissionDateTime", Part::DateTime),
        part("acquirerId", 20, 11, "acquirerId", Part::Numeric),
        part("forwardingInstitutionId", 31, 11, "forwardingInstitutionId", Part::Numeric),
    ],
};

pub(crate) static POS_CONDITION_CODE: RecordLayout = RecordLayout {
    what: "POS condition code",
    default_base: "pointOfService",
    record_len: 11,
    repeating: false,
    parts: &[
        part("attendance", 0, 1, "terminalClass.attendance", Part::Code(NO_TABLE)),
        part("operation", 1, 1, "terminalClass.operation", Part::Code(NO_TABLE)),
        part("location", 2, 1, "terminalClass.location", Part::Code(NO_TABLE)),
        part("cardholderPresence", 3, 1, "presentationType.cardholderPresence", Part::Code(NO_TABLE)),
        part("cardPresence", 4, 1, "presentationType.cardPresence", Part::Code(NO_TABLE)),
        part("cardRetention", 5, 1, "presentationType.cardRetention", Part::Code(NO_TABLE)),
        part("transactionStatus", 6, 1, "presentationType.transactionStatus", Part::Code(NO_TABLE)),
        part("securityCondition", 7, 1, "securityCondition", Part::Code(NO_TABLE)),
        part("terminalType", 8, 2, "terminalType", Part::Code(NO_TABLE)),
        part("cardDataInputCapability", 10, 1, "cardDataInputCapability", Part::Code(NO_TABLE)),
    ],
};

pub(crate) static ADDITIONAL_AMOUNTS: RecordLayout = RecordLayout {
    what: "additional amounts",
    default_base: "additionalAmounts",
    record_len: 20,
    repeating: true,
    parts: &[
        part("accountType", 0, 2, "accountType", Part::Text),
        part("amountType", 2, 2, "amountType", Part::Text),
        part("currencyCode", 4, 3, "currencyCode", Part::Numeric),
        part("creditDebitIndicator", 7, 1, "creditDebitIndicator", Part::Code(CREDIT_DEBIT)),
        part("amount", 8, 12, "amount", Part::Numeric),
    ],
};

pub(crate) static ADDITIONAL_FEES: RecordLayout = RecordLayout {
    what: "additional fees",
    default_base: "additionalFees",
    record_len: 12,
    repeating: true,
    parts: &[
        part("feeType", 0, 2, "feeType", Part::Text),
        part("creditDebitIndicator", 2, 1, "creditDebitIndicator", Part::Code(CREDIT_DEBIT)),
        part("amount", 3, 9, "amount", Part::Numeric),
    ],
};

pub(crate) static REPLACEMENT_AMOUNTS: RecordLayout = RecordLayout {
    what: "replacement amounts",
    default_base: "replacementAmounts",
    record_len: 42,
    repeating: true,
    parts: &[
        part("transactionAmount", 0, 12, "transactionAmount", Part::Numeric),
        part("settlementAmount", 12, 12, "settlementAmount", Part::Numeric),
        part("transactionFeeIndicator", 24, 1, "transactionFee.creditDebitIndicator", Part::Code(CREDIT_DEBIT)),
        part("transactionFee", 25, 8, "transactionFee.amount", Part::Numeric),
        part("settlementFeeIndicator", 33, 1, "settlementFee.creditDebitIndicator", Part::Code(CREDIT_DEBIT)),
        part("settlementFee", 34, 8, "settlementFee.amount", Part::Numeric),
    ],
};

pub(crate) static ACQUIRER_TRACE_DATA: RecordLayout = RecordLayout {
    what: "acquirer trace data",
    default_base: "acquirerTraceData",
    record_len: 93,
    repeating: false,
    parts: &[
        part("formatCode", 0, 1, "formatCode", Part::Code(ACQUIRER_FORMATS)),
        part("mixedUse", 1, 1, "referenceNumber.mixedUse", Part::Text),
        part("acquirerBin", 2, 6, "referenceNumber.acquirerBin", Part::Text),
        part("julianDate", 8, 4, "referenceNumber.julianDate", Part::Text),
        part("sequenceNumber", 12, 11, "referenceNumber.sequenceNumber", Part::Text),
        part("checkDigit", 23, 1, "referenceNumber.checkDigit", Part::Text),
        part("lifecycleIndicator", 24, 1, "lifecycle.indicator", Part::Code(LIFECYCLE)),
        part("lifecycleTraceId", 25, 15, "lifecycle.traceId", Part::Text),
        part("acceptanceBrand", 40, 3, "businessActivity.acceptanceBrand", Part::Caseless),
        part("serviceLevel", 43, 1, "businessActivity.serviceLevel", Part::Code(SERVICE_LEVELS)),
        part("serviceId", 44, 6, "businessActivity.serviceId", Part::Text),
        part("interchangeRateDesignator", 50, 2, "businessActivity.interchangeRateDesignator", Part::Text),
        part("businessDate", 52, 6, "businessDate", Part::ShortDate),
        part("businessCycle", 58, 2, "businessCycle", Part::Text),
        part("settlementDate", 60, 4, "settlementDate", Part::MonthDay),
        part("interchangeRateCode", 64, 2, "rateCodes.interchangeRateCode", Part::Text),
        part("conversionRateCode", 66, 1, "rateCodes.conversionRateCode", Part::Code(CONVERSION_RATES)),
        part("feeProgramIndicator", 67, 3, "rateCodes.feeProgramIndicator", Part::Text),
        part("originalTransactionId", 70, 15, "originalTransactionId", Part::Text),
        part("reserved", 85, 8, "", Part::Reserved),
    ],
};

pub(crate) static ISSUER_TRACE_DATA: RecordLayout = RecordLayout {
    what: "issuer trace data",
    default_base: "issuerTraceData",
    record_len: 52,
    repeating: false,
    parts: &[
        part("formatCode", 0, 1, "formatCode", Part::Code(ISSUER_FORMATS)),
        part("networkReference", 1, 9, "referenceNumber.networkReference", Part::Text),
        part("referenceSettlementDate", 10, 4, "referenceNumber.settlementDate", Part::MonthDay),
        part("lifecycleIndicator", 14, 1, "lifecycle.indicator", Part::Code(LIFECYCLE)),
        part("lifecycleTraceId", 15, 15, "lifecycle.traceId", Part::Text),
        part("serviceLevel", 30, 1, "businessActivity.serviceLevel", Part::Code(SERVICE_LEVELS)),
        part("serviceId", 31, 6, "businessActivity.serviceId", Part::Text),
        part("businessDate", 37, 6, "businessDate", Part::ShortDate),
        part("interchangeRateDesignator", 43, 2, "rateCodes.interchangeRateDesignator", Part::Text),
        part("conversionRateCode", 45, 1, "rateCodes.conversionRateCode", Part::Code(CONVERSION_RATES)),
        part("authorizationSource", 46, 1, "authorizationSource", Part::Code(AUTHORIZATION_SOURCES)),
        part("reserved", 47, 5, "", Part::Reserved),
    ],
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct LayoutParams {
    base_path: Option<String>,
    /// Per-part path overrides, absolute for single records and relative to
    /// the array element for repeating ones.
    paths: BTreeMap<String, String>,
    /// Per-part code tables, merged over the built-in ones.
    mappings: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordRule {
    layout: &'static RecordLayout,
    base_path: String,
    paths: BTreeMap<&'static str, String>,
    tables: BTreeMap<&'static str, BTreeMap<String, String>>,
}

impl RecordRule {
    pub(crate) fn compile(
        layout: &'static RecordLayout,
        params: LayoutParams,
    ) -> Result<Self, ComparatorError> {
        let known = |name: &str| layout.parts.iter().any(|part| part.name == name);
        if let Some(name) = params
            .paths
            .keys()
            .chain(params.mappings.keys())
            .find(|name| !known(name.as_str()))
        {
            return Err(ComparatorError::Rule(format!(
                "{} has no sub-field named {name:?}",
                layout.what
            )));
        }

        let base_path = params
            .base_path
            .unwrap_or_else(|| layout.default_base.to_owned());
        let mut paths = BTreeMap::new();
        let mut tables = BTreeMap::new();
        let mut mappings = params.mappings;
        for part in layout.parts {
            let path = match params.paths.get(part.name) {
                Some(path) => path.clone(),
                None if layout.repeating || base_path.is_empty() => part.path.to_owned(),
                None => format!("{base_path}.{}", part.path),
            };
            paths.insert(part.name, path);

            if let Part::Code(defaults) = part.part {
                let mut table = owned_table(defaults);
                table.extend(mappings.remove(part.name).unwrap_or_default());
                tables.insert(part.name, table);
            }
        }

        Ok(Self {
            layout,
            base_path,
            paths,
            tables,
        })
    }

    pub(crate) fn compare(&self, ctx: &CompareContext<'_>) -> Result<Verdict, ComparatorError> {
        let expected = ctx.expected;
        let total = expected.chars().count();
        let record_len = self.layout.record_len;

        if !self.layout.repeating {
            if total != record_len {
                return Err(ComparatorError::Length {
                    what: self.layout.what.to_owned(),
                    expected: record_len,
                    actual: total,
                });
            }
            let mut tally = Tally::default();
            self.compare_record(ctx, expected, ctx.canonical, "", &mut tally)?;
            return Ok(tally.into_verdict());
        }

        if total == 0 || total % record_len != 0 {
            return Err(ComparatorError::Length {
                what: format!("{} (multiple of {record_len})", self.layout.what),
                expected: record_len * (total / record_len).max(1),
                actual: total,
            });
        }
        let elements: Vec<&Value> = match resolve_node(ctx.canonical, &self.base_path) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(other) => vec![other],
            None => {
                return Err(ComparatorError::MissingPath {
                    path: self.base_path.clone(),
                });
            }
        };

        let records = total / record_len;
        let mut tally = Tally::default();
        for index in 0..records {
            let record = take(expected, index * record_len, record_len, self.layout.what)?;
            let label = if records > 1 {
                format!("[{index}].")
            } else {
                String::new()
            };
            match elements.get(index) {
                Some(element) => self.compare_record(ctx, record, element, &label, &mut tally)?,
                None => tally.mismatch(format!(
                    "{label}record: missing canonical element {index} under {}",
                    self.base_path
                )),
            }
        }
        Ok(tally.into_verdict())
    }

    fn compare_record(
        &self,
        ctx: &CompareContext<'_>,
        record: &str,
        node: &Value,
        label: &str,
        tally: &mut Tally,
    ) -> Result<(), ComparatorError> {
        for part in self.layout.parts {
            if matches!(part.part, Part::Reserved) {
                continue;
            }
            let raw = take(record, part.start, part.len, part.name)?;
            let name = format!("{label}{}", part.name);
            let got = self
                .paths
                .get(part.name)
                .and_then(|path| resolve(node, path));

            let decoded = match part.part {
                Part::Text => Ok((raw.trim().to_owned(), trimmed_eq as fn(&str, &str) -> bool)),
                Part::Caseless => Ok((raw.trim().to_owned(), caseless_eq as fn(&str, &str) -> bool)),
                Part::Numeric => Ok((raw.trim().to_owned(), numeric_eq as fn(&str, &str) -> bool)),
                Part::Code(_) => self.decode_code(part.name, raw),
                Part::MonthDay => reconstruct_month_day(raw, ctx.reference_year)
                    .map(|want| (want, prefix_eq as fn(&str, &str) -> bool)),
                Part::ShortDate => {
                    reconstruct_short_date(raw).map(|want| (want, prefix_eq as fn(&str, &str) -> bool))
                }
                Part::DateTime => reconstruct_datetime(raw, ctx.reference_year)
                    .map(|want| (want, prefix_eq as fn(&str, &str) -> bool)),
                Part::Reserved => continue,
            };

            match decoded {
                Ok((want, eq)) => tally.check(&name, &want, got.as_deref(), eq),
                Err(err) => tally.mismatch(format!("{name}: {err}")),
            }
        }
        Ok(())
    }

    fn decode_code(
        &self,
        name: &str,
        raw: &str,
    ) -> Result<(String, fn(&str, &str) -> bool), ComparatorError> {
        match self.tables.get(name) {
            Some(table) if !table.is_empty() => {
                lookup(table, raw, name).map(|mapped| (mapped.to_owned(), caseless_eq as fn(&str, &str) -> bool))
            }
            _ => Ok((raw.trim().to_owned(), caseless_eq as fn(&str, &str) -> bool)),
        }
    }
}
