use std::collections::BTreeMap;

use chrono::{Datelike, Local};
use iso_catalog::FieldCatalog;
use iso_codec::IsoMessage;
use iso_types::{DEFAULT_MTI, FieldDefinition, FieldId, RuleKind};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::additional_data::{AdditionalDataParams, AdditionalDataRule};
use crate::compare::{
    AdviceReversalParams, AdviceReversalRule, AmountParams, AmountRule, AvsRule, CompareContext,
    ComparatorError, IncrementalAuthRule, PairedDatetimeParams, PairedDatetimeRule, PathRule,
    PosEntryModeRule, Verdict, compare_equality,
};
use crate::layout::{
    ACQUIRER_TRACE_DATA, ADDITIONAL_AMOUNTS, ADDITIONAL_FEES, ISSUER_TRACE_DATA, LayoutParams,
    RecordLayout, MERCHANT_LOCATION, NATIONAL_POS_GEOGRAPHIC_DATA, NETWORK_DATA, ORIGINAL_DATA,
    POS_CONDITION_CODE, REPLACEMENT_AMOUNTS, RecordRule,
};
use crate::{FieldOutcome, FieldStatus, ValidationResult};

pub const NO_CATALOG_ENTRY: &str = "Field has no catalog entry";

/// One compiled comparator per rule kind.
#[derive(Debug, Clone)]
enum Comparator {
    Equality(Option<String>),
    Amount(AmountRule),
    Currency(PathRule),
    Datetime(PathRule),
    PairedDatetime(PairedDatetimeRule),
    PosEntryMode(PosEntryModeRule),
    AdviceReversal(AdviceReversalRule),
    Avs(AvsRule),
    IncrementalAuth(IncrementalAuthRule),
    AdditionalData(AdditionalDataRule),
    Record(RecordRule),
}

impl Comparator {
    fn compile(definition: &FieldDefinition) -> Result<Self, ComparatorError> {
        let first_path = definition.usable_canonical_paths().next();
        let params = rule_params(definition, first_path);

        Ok(match definition.rule_kind() {
            RuleKind::Equality => Self::Equality(
                params
                    .get("path")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            ),
            RuleKind::Amount => Self::Amount(parse::<AmountParams>(params)?.try_into()?),
            RuleKind::Currency => Self::Currency(parse(params)?),
            RuleKind::Datetime => Self::Datetime(parse(params)?),
            RuleKind::PairedDatetime => {
                Self::PairedDatetime(parse::<PairedDatetimeParams>(params)?.try_into()?)
            }
            RuleKind::PosEntryMode => Self::PosEntryMode(parse(params)?),
            RuleKind::AdviceReversalCode => {
                Self::AdviceReversal(parse::<AdviceReversalParams>(params)?.into())
            }
            RuleKind::AvsData => Self::Avs(parse(params)?),
            RuleKind::IncrementalAuthData => Self::IncrementalAuth(parse(params)?),
            RuleKind::AdditionalData => {
                Self::AdditionalData(parse::<AdditionalDataParams>(params)?.try_into()?)
            }
            RuleKind::MerchantLocation => record(&MERCHANT_LOCATION, params)?,
            RuleKind::PosConditionCode => record(&POS_CONDITION_CODE, params)?,
            RuleKind::OriginalData => record(&ORIGINAL_DATA, params)?,
            RuleKind::AdditionalFees => record(&ADDITIONAL_FEES, params)?,
            RuleKind::AdditionalAmounts => record(&ADDITIONAL_AMOUNTS, params)?,
            RuleKind::ReplacementAmounts => record(&REPLACEMENT_AMOUNTS, params)?,
            RuleKind::NationalPosGeographicData => record(&NATIONAL_POS_GEOGRAPHIC_DATA, params)?,
            RuleKind::NetworkData => record(&NETWORK_DATA, params)?,
            RuleKind::AcquirerTraceData => record(&ACQUIRER_TRACE_DATA, params)?,
            RuleKind::IssuerTraceData => record(&ISSUER_TRACE_DATA, params)?,
        })
    }

    fn compare(
        &self,
        ctx: &CompareContext<'_>,
        skip_reason: &str,
    ) -> Result<Verdict, ComparatorError> {
        match self {
            Self::Equality(path) => compare_equality(ctx, path.as_deref(), skip_reason),
            Self::Amount(rule) => rule.compare(ctx),
            Self::Currency(rule) => rule.compare_currency(ctx),
            Self::Datetime(rule) => rule.compare_datetime(ctx),
            Self::PairedDatetime(rule) => rule.compare(ctx),
            Self::PosEntryMode(rule) => rule.compare(ctx),
            Self::AdviceReversal(rule) => rule.compare(ctx),
            Self::Avs(rule) => rule.compare(ctx),
            Self::IncrementalAuth(rule) => rule.compare(ctx, skip_reason),
            Self::AdditionalData(rule) => rule.compare(ctx),
            Self::Record(rule) => rule.compare(ctx),
        }
    }
}

fn record(layout: &'static RecordLayout, params: Value) -> Result<Comparator, ComparatorError> {
    RecordRule::compile(layout, parse::<LayoutParams>(params)?).map(Comparator::Record)
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, ComparatorError> {
    serde_json::from_value(params).map_err(|err| ComparatorError::Rule(err.to_string()))
}

/// Kinds that compare against one canonical node and may borrow it from
/// `canonicalPaths`.
fn takes_single_path(kind: RuleKind) -> bool {
    matches!(
        kind,
        RuleKind::Equality
            | RuleKind::Amount
            | RuleKind::Currency
            | RuleKind::Datetime
            | RuleKind::PosEntryMode
    )
}

/// Rule parameters with `path` defaulted to the first usable canonical path.
/// A legacy `mti` object (`{"value": .., "skipReason": ..}`) collapses to its
/// value.
fn rule_params(definition: &FieldDefinition, first_path: Option<&str>) -> Value {
    let mut params = match definition.validation.as_ref().map(|rule| &rule.rules) {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(other) => return other.clone(),
    };
    if let Some(path) = first_path
        && takes_single_path(definition.rule_kind())
    {
        params
            .entry("path")
            .or_insert_with(|| Value::String(path.to_owned()));
    }
    let legacy_mti = match params.get("mti") {
        Some(Value::Object(legacy)) => Some(legacy.get("value").filter(|v| v.is_string()).cloned()),
        _ => None,
    };
    match legacy_mti {
        Some(Some(value)) => {
            params.insert("mti".to_owned(), value);
        }
        Some(None) => {
            params.remove("mti");
        }
        None => {}
    }
    Value::Object(params)
}

/// Routes each populated DE of a message to its comparator and records the
/// outcome. Compiled once per catalog; holds no per-message state.
#[derive(Debug, Clone)]
pub struct RuleDispatcher<'a> {
    catalog: &'a FieldCatalog,
    comparators: BTreeMap<FieldId, Result<Comparator, String>>,
    reference_year: i32,
}

impl<'a> RuleDispatcher<'a> {
    #[must_use]
    pub fn new(catalog: &'a FieldCatalog) -> Self {
        let comparators = catalog
            .iter()
            .map(|(field, definition)| {
                let compiled = Comparator::compile(definition).map_err(|err| {
                    warn!(field = %field.label(), error = %err, "validation rule rejected");
                    err.to_string()
                });
                (field, compiled)
            })
            .collect();
        Self {
            catalog,
            comparators,
            reference_year: Local::now().year(),
        }
    }

    /// Year used to complete `MMDD...` dates. Defaults to the current one.
    #[must_use]
    pub fn with_reference_year(mut self, year: i32) -> Self {
        self.reference_year = year;
        self
    }

    #[must_use]
    pub fn reference_year(&self) -> i32 {
        self.reference_year
    }

    #[must_use]
    pub fn catalog(&self) -> &'a FieldCatalog {
        self.catalog
    }

    /// Validates every populated field of `message`, MTI included, against
    /// `canonical`. Never fails: every problem becomes a recorded outcome.
    pub fn validate(
        &self,
        message: &IsoMessage,
        canonical: &Value,
        row_id: impl Into<String>,
    ) -> ValidationResult {
        let mut result = ValidationResult::new(row_id);
        let mut mirrors = Vec::new();
        for (field, value) in message.fields() {
            let (outcome, mirrored) = self.validate_field(field, value, message, canonical);
            debug!(
                row = %result.row_id(),
                field = %field.label(),
                status = ?outcome.status,
                detail = %outcome.detail,
                "field validated"
            );
            mirrors.extend(mirrored.into_iter().map(|other| (other, outcome.clone())));
            result.record(field, outcome);
        }
        // Mirrored outcomes win over the partner field's own comparator.
        for (field, outcome) in mirrors {
            result.record(field, outcome);
        }
        result
    }

    fn validate_field(
        &self,
        field: FieldId,
        value: &str,
        message: &IsoMessage,
        canonical: &Value,
    ) -> (FieldOutcome, Vec<FieldId>) {
        let outcome = |status, detail: String| {
            (
                FieldOutcome {
                    status,
                    expected: value.to_owned(),
                    detail,
                },
                Vec::new(),
            )
        };

        if let Some(issue) = self.catalog.issue_for(field) {
            return outcome(
                FieldStatus::Failed,
                format!("configuration error: {}", issue.detail),
            );
        }
        let Some(definition) = self.catalog.get(field) else {
            return outcome(FieldStatus::Skipped, NO_CATALOG_ENTRY.to_owned());
        };

        let rule = definition.validation.as_ref();
        let skip_reason = rule.map_or(iso_types::DEFAULT_SKIP_REASON, |rule| rule.skip_reason());
        let mti = message.mti().unwrap_or(DEFAULT_MTI);
        if rule.is_some_and(|rule| rule.skip || !rule.applies_to_mti(mti)) {
            return outcome(FieldStatus::Skipped, skip_reason.to_owned());
        }

        let comparator = match self.comparators.get(&field) {
            Some(Ok(comparator)) => comparator,
            Some(Err(detail)) => {
                return outcome(FieldStatus::Failed, format!("configuration error: {detail}"));
            }
            None => return outcome(FieldStatus::Skipped, NO_CATALOG_ENTRY.to_owned()),
        };

        let ctx = CompareContext {
            field,
            expected: value,
            message,
            canonical,
            reference_year: self.reference_year,
        };
        match comparator.compare(&ctx, skip_reason) {
            Ok(verdict) => (
                FieldOutcome {
                    status: verdict.status,
                    expected: verdict.expected.unwrap_or_else(|| value.to_owned()),
                    detail: verdict.detail,
                },
                verdict.mirrored,
            ),
            Err(err) => outcome(FieldStatus::Failed, err.to_string()),
        }
    }
}
