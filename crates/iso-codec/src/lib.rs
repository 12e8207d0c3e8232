#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use iso_catalog::FieldCatalog;
use iso_types::{DEFAULT_MTI, DataType, FieldDefinition, FieldFormat, FieldId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

const BITMAP_HEX_LEN: usize = 16;
const MTI_LEN: usize = 4;

const DIGITS: &[u8] = b"0123456789";
const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const HEX_DIGITS: &[u8] = b"0123456789ABCDEF";
const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Non-blocking problems noticed while filling a message.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormatWarning {
    #[error("field id {raw:?} ignored: {reason}")]
    InvalidFieldId { raw: String, reason: String },
    #[error("DE{field} is the secondary bitmap slot and cannot be set directly")]
    ReservedField { field: FieldId },
    #[error("DE{field} value truncated from {original_len} to {max_len} characters")]
    Truncated {
        field: FieldId,
        original_len: usize,
        max_len: usize,
    },
    #[error("DE{field} declared type {declared} does not match configured type {configured}")]
    TypeMismatch {
        field: FieldId,
        declared: String,
        configured: String,
    },
    #[error("DE{field} has no catalog entry and is emitted as fixed width")]
    UnknownField { field: FieldId },
    #[error("DE{field} is active but has no configured length; no default generated")]
    NoDefaultLength { field: FieldId },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("wire message is shorter than the 4-character MTI")]
    MissingMti,
    #[error("bitmap {0:?} is not 16 hex digits")]
    BadBitmap(String),
    #[error("DE{field} length prefix {prefix:?} is not decimal")]
    BadPrefix { field: FieldId, prefix: String },
    #[error("DE{field} needs {needed} characters but only {available} remain")]
    Truncated {
        field: FieldId,
        needed: usize,
        available: usize,
    },
    #[error("DE{field} is fixed width but the catalog gives no length")]
    UnknownWidth { field: FieldId },
    #[error("{0} unread characters after the last field")]
    TrailingData(usize),
}

/// Result of a single field update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldUpdate {
    Stored,
    Truncated { original_len: usize, max_len: usize },
    Ignored,
}

/// One outbound message under construction. Bitmaps are always derived from
/// the populated fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IsoMessage {
    fields: BTreeMap<FieldId, String>,
    manually_updated: BTreeSet<FieldId>,
    warnings: Vec<FormatWarning>,
}

impl IsoMessage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn mti(&self) -> Option<&str> {
        self.fields.get(&FieldId::MTI).map(String::as_str)
    }

    #[must_use]
    pub fn field(&self, field: FieldId) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    /// All populated entries in ascending numeric order, MTI first.
    pub fn fields(&self) -> impl Iterator<Item = (FieldId, &str)> {
        self.fields.iter().map(|(field, value)| (*field, value.as_str()))
    }

    /// Populated data elements 1..=128 in ascending numeric order.
    pub fn data_elements(&self) -> impl Iterator<Item = (FieldId, &str)> {
        self.fields().filter(|(field, _)| !field.is_mti())
    }

    #[must_use]
    pub fn is_manually_updated(&self, field: FieldId) -> bool {
        self.manually_updated.contains(&field)
    }

    #[must_use]
    pub fn warnings(&self) -> &[FormatWarning] {
        &self.warnings
    }

    #[must_use]
    pub fn has_primary_fields(&self) -> bool {
        self.fields.keys().any(|field| field.is_primary())
    }

    #[must_use]
    pub fn has_secondary_fields(&self) -> bool {
        self.fields.keys().any(|field| field.is_secondary())
    }

    /// Presence of DE1..=DE64, bit 1 in the most significant position. Bit 1
    /// is set whenever any secondary field is populated.
    #[must_use]
    pub fn primary_bitmap(&self) -> u64 {
        let mut bitmap = self
            .fields
            .keys()
            .filter(|field| field.is_primary())
            .fold(0u64, |acc, field| acc | bit_mask(field.number()));
        if self.has_secondary_fields() {
            bitmap |= bit_mask(1);
        }
        bitmap
    }

    /// Presence of DE65..=DE128.
    #[must_use]
    pub fn secondary_bitmap(&self) -> u64 {
        self.fields
            .keys()
            .filter(|field| field.is_secondary())
            .fold(0u64, |acc, field| acc | bit_mask(field.number() - 64))
    }

    pub fn clear(&mut self) {
        self.fields.clear();
        self.manually_updated.clear();
        self.warnings.clear();
    }

    fn insert(&mut self, field: FieldId, value: String) {
        self.fields.insert(field, value);
    }

    fn warn(&mut self, warning: FormatWarning) {
        warn!(%warning, "format warning");
        self.warnings.push(warning);
    }
}

/// Fills and serializes [`IsoMessage`] values against a read-only catalog.
#[derive(Debug, Clone, Copy)]
pub struct MessageBuilder<'a> {
    catalog: &'a FieldCatalog,
}

impl<'a> MessageBuilder<'a> {
    #[must_use]
    pub fn new(catalog: &'a FieldCatalog) -> Self {
        Self { catalog }
    }

    #[must_use]
    pub fn catalog(&self) -> &'a FieldCatalog {
        self.catalog
    }

    /// Explicit update from test data. Marks the field as manually updated so
    /// default generation leaves it alone.
    pub fn set_field(&self, message: &mut IsoMessage, de_id: &str, value: &str) -> FieldUpdate {
        let field = match de_id.parse::<FieldId>() {
            Ok(field) => field,
            Err(err) => {
                message.warn(FormatWarning::InvalidFieldId {
                    raw: de_id.to_owned(),
                    reason: err.to_string(),
                });
                return FieldUpdate::Ignored;
            }
        };
        self.set(message, field, value)
    }

    /// Like [`Self::set_field`], additionally checking the caller's declared
    /// type against the configured one.
    pub fn set_typed_field(
        &self,
        message: &mut IsoMessage,
        de_id: &str,
        value: &str,
        declared_type: &str,
    ) -> FieldUpdate {
        let update = self.set_field(message, de_id, value);
        if update == FieldUpdate::Ignored || declared_type.trim().is_empty() {
            return update;
        }
        if let Ok(field) = de_id.parse::<FieldId>()
            && let Some(definition) = self.catalog.get(field)
        {
            let declared = DataType::from(declared_type);
            if declared != definition.data_type {
                message.warn(FormatWarning::TypeMismatch {
                    field,
                    declared: declared.as_str().to_owned(),
                    configured: definition.data_type.as_str().to_owned(),
                });
            }
        }
        update
    }

    pub fn set(&self, message: &mut IsoMessage, field: FieldId, value: &str) -> FieldUpdate {
        if field.number() == 1 {
            message.warn(FormatWarning::ReservedField { field });
            return FieldUpdate::Ignored;
        }
        let update = self.store(message, field, value);
        message.manually_updated.insert(field);
        update
    }

    fn store(&self, message: &mut IsoMessage, field: FieldId, value: &str) -> FieldUpdate {
        let Some(definition) = self.catalog.get(field) else {
            if !field.is_mti() {
                message.warn(FormatWarning::UnknownField { field });
            }
            message.insert(field, value.to_owned());
            return FieldUpdate::Stored;
        };

        let max_len = definition.effective_max_length();
        let original_len = value.chars().count();
        if original_len > max_len {
            message.insert(field, value.chars().take(max_len).collect());
            message.warn(FormatWarning::Truncated {
                field,
                original_len,
                max_len,
            });
            return FieldUpdate::Truncated {
                original_len,
                max_len,
            };
        }
        message.insert(field, value.to_owned());
        FieldUpdate::Stored
    }

    /// Populates every active catalog field the test author did not set, and
    /// the MTI when it is still missing.
    pub fn apply_defaults<R: Rng + ?Sized>(&self, message: &mut IsoMessage, rng: &mut R) {
        if message.mti().is_none() && !message.is_manually_updated(FieldId::MTI) {
            message.insert(FieldId::MTI, DEFAULT_MTI.to_owned());
        }

        for (field, definition) in self.catalog.active_fields() {
            if field.is_mti() || field.number() == 1 || message.is_manually_updated(field) {
                continue;
            }
            let Some(len) = default_length(definition) else {
                message.warn(FormatWarning::NoDefaultLength { field });
                continue;
            };
            let value = generate_value(&definition.data_type, len, rng);
            debug!(field = %field, len, "generated default value");
            self.store(message, field, &value);
        }
    }

    /// Wire form: MTI, primary bitmap, secondary bitmap, then each populated
    /// field with its length prefix.
    #[must_use]
    pub fn build(&self, message: &IsoMessage) -> String {
        let mut wire = String::new();
        wire.push_str(message.mti().unwrap_or(DEFAULT_MTI));

        let primary = message.primary_bitmap();
        let secondary = message.secondary_bitmap();
        if primary != 0 {
            wire.push_str(&bitmap_to_hex(primary));
        }
        if secondary != 0 {
            wire.push_str(&bitmap_to_hex(secondary));
        }

        for (field, value) in message.data_elements() {
            wire.push_str(&self.encode_field(field, value));
        }
        wire
    }

    /// JSON view keyed `MTI`, `PrimaryBitmap`, `SecondaryBitmap` and
    /// `Field_<n>`, each value carrying the same prefix as on the wire.
    #[must_use]
    pub fn build_debug_view(&self, message: &IsoMessage) -> Value {
        let mut view = Map::new();
        view.insert(
            "MTI".to_owned(),
            Value::String(message.mti().unwrap_or(DEFAULT_MTI).to_owned()),
        );

        let primary = message.primary_bitmap();
        let secondary = message.secondary_bitmap();
        if primary != 0 {
            view.insert(
                "PrimaryBitmap".to_owned(),
                Value::String(bitmap_to_hex(primary)),
            );
        }
        if secondary != 0 {
            view.insert(
                "SecondaryBitmap".to_owned(),
                Value::String(bitmap_to_hex(secondary)),
            );
        }

        for (field, value) in message.data_elements() {
            view.insert(
                format!("Field_{field}"),
                Value::String(self.encode_field(field, value)),
            );
        }
        Value::Object(view)
    }

    fn format_of(&self, field: FieldId) -> FieldFormat {
        self.catalog
            .get(field)
            .map(|definition| definition.format)
            .unwrap_or_default()
    }

    fn encode_field(&self, field: FieldId, value: &str) -> String {
        encode_prefixed(self.format_of(field), value)
    }
}

/// `value` preceded by its `%02d` / `%03d` character count, or bare for fixed
/// width.
#[must_use]
pub fn encode_prefixed(format: FieldFormat, value: &str) -> String {
    let width = format.prefix_len();
    if width == 0 {
        return value.to_owned();
    }
    format!("{:0width$}{value}", value.chars().count())
}

/// Splits one prefixed value off the front of `input`.
pub fn decode_prefixed(
    field: FieldId,
    format: FieldFormat,
    fixed_len: usize,
    input: &str,
) -> Result<(&str, &str), WireError> {
    let width = format.prefix_len();
    let (len, body) = if width == 0 {
        if fixed_len == 0 {
            return Err(WireError::UnknownWidth { field });
        }
        (fixed_len, input)
    } else {
        let (prefix, body) = split_chars(input, width).ok_or(WireError::Truncated {
            field,
            needed: width,
            available: input.chars().count(),
        })?;
        if !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(WireError::BadPrefix {
                field,
                prefix: prefix.to_owned(),
            });
        }
        let len = prefix.parse::<usize>().map_err(|_| WireError::BadPrefix {
            field,
            prefix: prefix.to_owned(),
        })?;
        (len, body)
    };

    split_chars(body, len).ok_or(WireError::Truncated {
        field,
        needed: len,
        available: body.chars().count(),
    })
}

#[must_use]
pub fn bitmap_to_hex(bitmap: u64) -> String {
    format!("{bitmap:016X}")
}

pub fn bitmap_from_hex(hex: &str) -> Result<u64, WireError> {
    if hex.len() != BITMAP_HEX_LEN || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(WireError::BadBitmap(hex.to_owned()));
    }
    u64::from_str_radix(hex, 16).map_err(|_| WireError::BadBitmap(hex.to_owned()))
}

/// Field numbers flagged in `bitmap`, where bit 1 maps to `first_field`.
#[must_use]
pub fn fields_in_bitmap(bitmap: u64, first_field: u8) -> Vec<FieldId> {
    (1..=64u8)
        .filter(|bit| bitmap & bit_mask(*bit) != 0)
        .filter_map(|bit| FieldId::new(u32::from(first_field) + u32::from(bit) - 1).ok())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedWire {
    pub mti: String,
    pub primary_bitmap: Option<u64>,
    pub secondary_bitmap: Option<u64>,
    pub fields: BTreeMap<FieldId, String>,
}

/// Decodes a message produced by [`MessageBuilder::build`]. Fixed-width fields
/// are read at their configured `length`, so this is only a codec self-check,
/// not a general parser for received traffic.
pub fn parse_wire(catalog: &FieldCatalog, wire: &str) -> Result<ParsedWire, WireError> {
    let (mti, mut rest) = split_chars(wire, MTI_LEN).ok_or(WireError::MissingMti)?;
    let mut parsed = ParsedWire {
        mti: mti.to_owned(),
        primary_bitmap: None,
        secondary_bitmap: None,
        fields: BTreeMap::new(),
    };
    if rest.is_empty() {
        return Ok(parsed);
    }

    let (primary_hex, after_primary) =
        split_chars(rest, BITMAP_HEX_LEN).ok_or_else(|| WireError::BadBitmap(rest.to_owned()))?;
    let primary = bitmap_from_hex(primary_hex)?;
    rest = after_primary;
    parsed.primary_bitmap = Some(primary);

    let mut present = fields_in_bitmap(primary, 1);
    if primary & bit_mask(1) != 0 {
        let (secondary_hex, after_secondary) = split_chars(rest, BITMAP_HEX_LEN)
            .ok_or_else(|| WireError::BadBitmap(rest.to_owned()))?;
        let secondary = bitmap_from_hex(secondary_hex)?;
        rest = after_secondary;
        parsed.secondary_bitmap = Some(secondary);
        present.extend(fields_in_bitmap(secondary, 65));
    }

    for field in present.into_iter().filter(|field| field.number() != 1) {
        let definition = catalog.get(field);
        let format = definition.map(|d| d.format).unwrap_or_default();
        let fixed_len = definition.map(fixed_width).unwrap_or(0);
        let (value, remaining) = decode_prefixed(field, format, fixed_len, rest)?;
        parsed.fields.insert(field, value.to_owned());
        rest = remaining;
    }

    if !rest.is_empty() {
        return Err(WireError::TrailingData(rest.chars().count()));
    }
    Ok(parsed)
}

fn fixed_width(definition: &FieldDefinition) -> usize {
    if definition.length > 0 {
        definition.length
    } else {
        definition.max_length.unwrap_or(0)
    }
}

fn default_length(definition: &FieldDefinition) -> Option<usize> {
    let len = if definition.length > 0 {
        definition.length
    } else {
        definition.max_length.unwrap_or(0)
    };
    (len > 0).then(|| len.min(definition.effective_max_length()))
}

fn generate_value<R: Rng + ?Sized>(data_type: &DataType, len: usize, rng: &mut R) -> String {
    let charset = match data_type {
        DataType::Numeric => DIGITS,
        DataType::Alpha => LETTERS,
        DataType::Binary => HEX_DIGITS,
        DataType::Alphanumeric | DataType::AlphanumericSpecial | DataType::Other(_) => {
            ALPHANUMERIC
        }
    };
    (0..len)
        .map(|_| char::from(charset[rng.gen_range(0..charset.len())]))
        .collect()
}

fn bit_mask(bit: u8) -> u64 {
    1u64 << (64 - u32::from(bit))
}

fn split_chars(input: &str, count: usize) -> Option<(&str, &str)> {
    if count == 0 {
        return Some(("", input));
    }
    match input.char_indices().nth(count) {
        Some((idx, _)) => Some(input.split_at(idx)),
        None if input.chars().count() == count => Some((input, "")),
        None => None,
    }
}
