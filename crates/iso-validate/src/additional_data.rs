//! Bitmap-driven additional data: `[format:2][length:3][primary:8 hex]
//! [secondary:8 hex]?[values...]`, each set flag owning one fixed-width value
//! whose width is declared per format in the rule.

use std::collections::BTreeMap;

use iso_jsonpath::resolve;
use serde::Deserialize;

use crate::compare::{
    CompareContext, ComparatorError, Tally, Verdict, numeric_eq, require_digits, take, trimmed_eq,
};

const FORMAT_LEN: usize = 2;
const LENGTH_LEN: usize = 3;
const BITMAP_LEN: usize = 8;
const FLAGS_PER_BITMAP: u8 = 32;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AdditionalDataParams {
    formats: BTreeMap<String, FormatParams>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormatParams {
    #[serde(default)]
    base_path: Option<String>,
    fields: BTreeMap<String, SubFieldParams>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubFieldParams {
    name: String,
    #[serde(default)]
    length: usize,
    #[serde(default)]
    path: Option<String>,
    /// Flag carries meaning by being set; the canonical value is a boolean.
    #[serde(default)]
    presence: bool,
    #[serde(default)]
    numeric: bool,
}

#[derive(Debug, Clone)]
struct SubField {
    name: String,
    length: usize,
    path: String,
    presence: bool,
    numeric: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct AdditionalDataRule {
    formats: BTreeMap<String, BTreeMap<u8, SubField>>,
}

impl TryFrom<AdditionalDataParams> for AdditionalDataRule {
    type Error = ComparatorError;

    fn try_from(params: AdditionalDataParams) -> Result<Self, Self::Error> {
        let mut formats = BTreeMap::new();
        for (format_id, format) in params.formats {
            let mut fields = BTreeMap::new();
            for (flag, field) in format.fields {
                let bit = flag
                    .trim()
                    .parse::<u8>()
                    .ok()
                    .filter(|bit| (2..=2 * FLAGS_PER_BITMAP).contains(bit))
                    .ok_or_else(|| {
                        ComparatorError::Rule(format!(
                            "additional data format {format_id}: flag {flag:?} is not in 2..=64"
                        ))
                    })?;
                let leaf = field.path.unwrap_or_else(|| field.name.clone());
                let path = match &format.base_path {
                    Some(base) if !base.is_empty() => format!("{base}.{leaf}"),
                    _ => leaf,
                };
                fields.insert(
                    bit,
                    SubField {
                        name: field.name,
                        length: field.length,
                        path,
                        presence: field.presence,
                        numeric: field.numeric,
                    },
                );
            }
            formats.insert(format_id, fields);
        }
        Ok(Self { formats })
    }
}

impl AdditionalDataRule {
    pub(crate) fn compare(&self, ctx: &CompareContext<'_>) -> Result<Verdict, ComparatorError> {
        let input = ctx.expected;
        let total = input.chars().count();

        let format_id = take(input, 0, FORMAT_LEN, "additional data format")?;
        let fields = self
            .formats
            .get(format_id)
            .ok_or_else(|| ComparatorError::UnknownCode {
                what: "additional data format".to_owned(),
                code: format_id.to_owned(),
            })?;

        let declared = require_digits(
            take(input, FORMAT_LEN, LENGTH_LEN, "additional data length")?,
            "additional data length",
        )?;
        let body_len = total - FORMAT_LEN - LENGTH_LEN;
        if declared.parse::<usize>().ok() != Some(body_len) {
            return Err(ComparatorError::Length {
                what: "additional data body".to_owned(),
                expected: declared.parse::<usize>().unwrap_or_default(),
                actual: body_len,
            });
        }

        let mut offset = FORMAT_LEN + LENGTH_LEN;
        let primary = parse_bitmap(take(input, offset, BITMAP_LEN, "primary bitmap")?)?;
        offset += BITMAP_LEN;
        let mut set_bits = flags_in(primary, 1);
        if set_bits.first() == Some(&1) {
            set_bits.remove(0);
            let secondary = parse_bitmap(take(input, offset, BITMAP_LEN, "secondary bitmap")?)?;
            offset += BITMAP_LEN;
            set_bits.extend(flags_in(secondary, FLAGS_PER_BITMAP + 1));
        }

        let mut tally = Tally::default();
        for bit in &set_bits {
            let field = fields.get(bit).ok_or_else(|| ComparatorError::UnknownCode {
                what: format!("additional data format {format_id} flag"),
                code: bit.to_string(),
            })?;
            let value = take(input, offset, field.length, &field.name)?;
            offset += field.length;

            let got = resolve(ctx.canonical, &field.path);
            if field.presence {
                tally.check(&field.name, "true", got.as_deref(), caseless_bool_eq);
            } else if field.numeric {
                tally.check(&field.name, value.trim(), got.as_deref(), numeric_eq);
            } else {
                tally.check(&field.name, value.trim(), got.as_deref(), trimmed_eq);
            }
        }

        // Unset presence flags must not be claimed by the canonical form.
        for (bit, field) in fields {
            if !field.presence || set_bits.contains(bit) {
                continue;
            }
            match resolve(ctx.canonical, &field.path) {
                Some(got) if !got.is_empty() && !got.eq_ignore_ascii_case("false") => {
                    tally.mismatch(format!(
                        "{}: flag not set, actual {got:?}",
                        field.name
                    ));
                }
                _ => {}
            }
        }

        if offset != total {
            return Err(ComparatorError::Length {
                what: "additional data values".to_owned(),
                expected: offset,
                actual: total,
            });
        }
        Ok(tally.into_verdict())
    }
}

fn caseless_bool_eq(want: &str, got: &str) -> bool {
    want.eq_ignore_ascii_case(got.trim())
}

fn parse_bitmap(hex: &str) -> Result<u32, ComparatorError> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ComparatorError::NonNumeric {
            what: "additional data bitmap".to_owned(),
            value: hex.to_owned(),
        });
    }
    u32::from_str_radix(hex, 16).map_err(|_| ComparatorError::NonNumeric {
        what: "additional data bitmap".to_owned(),
        value: hex.to_owned(),
    })
}

/// Flag numbers set in `bitmap`, most significant bit first.
fn flags_in(bitmap: u32, first_flag: u8) -> Vec<u8> {
    (0..FLAGS_PER_BITMAP)
        .filter(|idx| bitmap & (1u32 << (FLAGS_PER_BITMAP - 1 - idx)) != 0)
        .map(|idx| first_flag + idx)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{flags_in, parse_bitmap};

    #[test]
    fn flags_are_numbered_from_the_most_significant_bit() {
        assert_eq!(flags_in(0x8000_0000, 1), vec![1]);
        assert_eq!(flags_in(0x6000_0000, 1), vec![2, 3]);
        assert_eq!(flags_in(0x0000_0001, 33), vec![64]);
        assert!(parse_bitmap("6000000G").is_err());
        assert_eq!(parse_bitmap("60000000").expect("hex"), 0x6000_0000);
    }
}
