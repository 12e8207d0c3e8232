#![forbid(unsafe_code)]

//! Property tests for the wire codec and canonical path resolution.

use std::collections::BTreeSet;

use iso_catalog::FieldCatalog;
use iso_codec::{
    IsoMessage, MessageBuilder, bitmap_from_hex, bitmap_to_hex, decode_prefixed, encode_prefixed,
    parse_wire,
};
use iso_jsonpath::resolve;
use iso_types::{FieldFormat, FieldId};
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::{Map, Value, json};

fn de(number: u32) -> FieldId {
    FieldId::new(number).expect("field id")
}

fn wire_catalog() -> FieldCatalog {
    FieldCatalog::from_json_value(json!({
        "2": {"format": "LLVAR", "maxLength": 19, "dataType": "n"},
        "3": {"length": 6, "dataType": "n"},
        "48": {"format": "LLLVAR", "maxLength": 999, "dataType": "ans"},
        "70": {"length": 3, "dataType": "n"},
        "102": {"format": "LLVAR", "maxLength": 28, "dataType": "ans"},
        "120": {"format": "LLLVAR", "maxLength": 999, "dataType": "ans"}
    }))
    .expect("catalog")
}

#[derive(Debug, Clone)]
struct Fields {
    pan: Option<String>,
    processing_code: Option<String>,
    additional: Option<String>,
    network_code: Option<String>,
    account: Option<String>,
    private: Option<String>,
}

impl Fields {
    fn entries(&self) -> Vec<(u32, &str)> {
        [
            (2, &self.pan),
            (3, &self.processing_code),
            (48, &self.additional),
            (70, &self.network_code),
            (102, &self.account),
            (120, &self.private),
        ]
        .into_iter()
        .filter_map(|(number, value)| value.as_deref().map(|value| (number, value)))
        .collect()
    }
}

fn fields_strategy() -> impl Strategy<Value = Fields> {
    (
        proptest::option::of("[0-9]{0,25}"),
        proptest::option::of("[0-9]{6}"),
        proptest::option::of("[ -~]{0,120}"),
        proptest::option::of("[0-9]{3}"),
        proptest::option::of("[A-Z0-9 ]{0,28}"),
        proptest::option::of("[ -~]{0,200}"),
    )
        .prop_map(
            |(pan, processing_code, additional, network_code, account, private)| Fields {
                pan,
                processing_code,
                additional,
                network_code,
                account,
                private,
            },
        )
}

fn build(catalog: &FieldCatalog, fields: &Fields) -> IsoMessage {
    let builder = MessageBuilder::new(catalog);
    let mut message = IsoMessage::new();
    builder.set_field(&mut message, "0", "0200");
    for (number, value) in fields.entries() {
        builder.set_field(&mut message, &number.to_string(), value);
    }
    message
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn wire_length_follows_prefixes_and_bitmaps(fields in fields_strategy()) {
        let catalog = wire_catalog();
        let message = build(&catalog, &fields);
        let wire = MessageBuilder::new(&catalog).build(&message);

        let mut expected = 4;
        if message.data_elements().next().is_some() {
            expected += 16;
        }
        if message.has_secondary_fields() {
            expected += 16;
        }
        for (field, value) in message.data_elements() {
            let format = catalog.get(field).map(|definition| definition.format).unwrap_or_default();
            expected += format.prefix_len() + value.chars().count();
        }
        prop_assert_eq!(wire.chars().count(), expected);
        prop_assert!(wire.starts_with("0200"));
    }

    #[test]
    fn built_wire_parses_back_to_the_same_fields(fields in fields_strategy()) {
        let catalog = wire_catalog();
        let message = build(&catalog, &fields);
        let wire = MessageBuilder::new(&catalog).build(&message);
        let parsed = parse_wire(&catalog, &wire).expect("parse");

        prop_assert_eq!(parsed.mti.as_str(), "0200");
        let original = message
            .data_elements()
            .map(|(field, value)| (field, value.to_owned()))
            .collect::<Vec<_>>();
        let decoded = parsed.fields.into_iter().collect::<Vec<_>>();
        prop_assert_eq!(decoded, original);
        prop_assert_eq!(parsed.secondary_bitmap.is_some(), message.has_secondary_fields());
    }

    #[test]
    fn overlong_pan_is_truncated_to_catalog_maximum(pan in "[0-9]{20,40}") {
        let catalog = wire_catalog();
        let builder = MessageBuilder::new(&catalog);
        let mut message = IsoMessage::new();
        builder.set_field(&mut message, "2", &pan);
        prop_assert_eq!(message.field(de(2)), Some(&pan[..19]));
        prop_assert_eq!(message.warnings().len(), 1);
    }

    #[test]
    fn bitmap_hex_round_trips(bitmap in any::<u64>()) {
        let hex = bitmap_to_hex(bitmap);
        prop_assert_eq!(hex.len(), 16);
        prop_assert_eq!(bitmap_from_hex(&hex).expect("hex"), bitmap);
        prop_assert_eq!(bitmap_from_hex(&hex.to_lowercase()).expect("lower hex"), bitmap);
    }

    #[test]
    fn variable_prefixes_decode_what_they_encode(
        value in "[ -~]{0,99}",
        tail in "[0-9]{0,8}",
        lllvar in any::<bool>(),
    ) {
        let format = if lllvar { FieldFormat::Lllvar } else { FieldFormat::Llvar };
        let encoded = encode_prefixed(format, &value);
        prop_assert_eq!(encoded.len(), format.prefix_len() + value.len());

        let input = format!("{encoded}{tail}");
        let (decoded, rest) = decode_prefixed(de(48), format, 0, &input).expect("decode");
        prop_assert_eq!(decoded, value.as_str());
        prop_assert_eq!(rest, tail.as_str());
    }

    #[test]
    fn defaults_populate_the_same_fields_for_any_seed(first in any::<u64>(), second in any::<u64>()) {
        let catalog = FieldCatalog::from_json_value(json!({
            "3": {"length": 6, "dataType": "n", "active": true},
            "11": {"length": 6, "dataType": "n", "active": true},
            "37": {"length": 12, "dataType": "an", "active": true},
            "41": {"format": "LLVAR", "maxLength": 8, "dataType": "ans", "active": true},
            "52": {"length": 16, "dataType": "b", "active": true}
        }))
        .expect("catalog");
        let builder = MessageBuilder::new(&catalog);

        let populate = |seed: u64| {
            let mut message = IsoMessage::new();
            builder.set_field(&mut message, "3", "000000");
            builder.apply_defaults(&mut message, &mut StdRng::seed_from_u64(seed));
            message
        };
        let one = populate(first);
        let two = populate(second);

        let keys = |message: &IsoMessage| {
            message
                .fields()
                .map(|(field, value)| (field, value.chars().count()))
                .collect::<BTreeSet<_>>()
        };
        prop_assert_eq!(keys(&one), keys(&two));
        prop_assert_eq!(one.field(de(3)), Some("000000"));
        prop_assert_eq!(one.mti(), Some("0100"));
        prop_assert!(one.field(de(11)).is_some_and(|value| value.bytes().all(|b| b.is_ascii_digit())));
        prop_assert!(one.field(de(52)).is_some_and(|value| value.bytes().all(|b| b.is_ascii_hexdigit())));
    }

    #[test]
    fn path_resolution_ignores_key_case(
        outer in "[a-z]{1,8}",
        inner in "[a-z]{1,8}",
        value in "[A-Za-z0-9]{1,12}",
        upper_mask in any::<u16>(),
    ) {
        let mut leaf = Map::new();
        leaf.insert(inner.clone(), Value::String(value.clone()));
        let mut root = Map::new();
        root.insert(outer.clone(), Value::Object(leaf));
        let canonical = Value::Object(root);
        let path = format!("{outer}.{inner}");
        let shuffled = path
            .chars()
            .enumerate()
            .map(|(index, c)| {
                if upper_mask & (1 << (index % 16)) != 0 {
                    c.to_ascii_uppercase()
                } else {
                    c
                }
            })
            .collect::<String>();
        prop_assert_eq!(resolve(&canonical, &shuffled), Some(value));
    }
}
