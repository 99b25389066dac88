/// Property-based tests using proptest
/// Tests invariants that should hold for all location batches
use proptest::prelude::*;
use rust_keys_server::lookup::{AttributeSchema, AttributeSpec, LookupConfiguration};
use rust_keys_server::models::{
    AttributeValue, CoverageTypeId, LocationRecord, ModelInfo, PerilId, RawLocation,
};
use rust_keys_server::reference_data::{AreaLevel, AreaRecord, VulnerabilityRecord};
use rust_keys_server::reference_lookup::{ReferenceTableLookup, ReferenceTables};
use rust_keys_server::resolver::ResolverSettings;
use rust_keys_server::service::KeysService;
use rust_keys_server::transcoding::{decode_locations, encode_locations, encode_results, Format};
use rust_keys_server::validation::validate_location;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

fn schema() -> AttributeSchema {
    AttributeSchema::new(vec![
        AttributeSpec::number("latitude").range(-90.0, 90.0),
        AttributeSpec::number("longitude").range(-180.0, 180.0),
        AttributeSpec::text("countrycode"),
        AttributeSpec::text("occupancycode"),
    ])
}

/// Non-blank text that may carry padding, delimiters, quotes and line breaks.
fn text_strategy() -> impl Strategy<Value = String> {
    "[ ,\"\\n]{0,2}[A-Z0-9][A-Z0-9 ,\"\\n]{0,4}"
}

fn location_strategy() -> impl Strategy<Value = BTreeMap<String, AttributeValue>> {
    (
        proptest::option::of(-9000i32..=9000),
        proptest::option::of(-18000i32..=18000),
        proptest::option::of(text_strategy()),
        proptest::option::of("[0-9]{4}"),
        // not in the schema, so it passes through validation untouched
        proptest::option::of(text_strategy()),
    )
        .prop_map(|(lat, lon, country, occupancy, note)| {
            let mut attributes = BTreeMap::new();
            if let Some(lat) = lat {
                attributes.insert("latitude".to_string(), AttributeValue::Number(lat as f64 / 100.0));
            }
            if let Some(lon) = lon {
                attributes.insert("longitude".to_string(), AttributeValue::Number(lon as f64 / 100.0));
            }
            if let Some(country) = country {
                attributes.insert("countrycode".to_string(), AttributeValue::Text(country));
            }
            if let Some(occupancy) = occupancy {
                attributes.insert("occupancycode".to_string(), AttributeValue::Text(occupancy));
            }
            if let Some(note) = note {
                attributes.insert("note".to_string(), AttributeValue::Text(note));
            }
            attributes
        })
}

fn locations_strategy() -> impl Strategy<Value = Vec<LocationRecord>> {
    proptest::collection::vec(location_strategy(), 1..20).prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(idx, attributes)| LocationRecord {
                location_id: format!("L{}", idx),
                attributes,
            })
            .collect()
    })
}

fn round_trip(locations: &[LocationRecord], format: Format) -> Vec<LocationRecord> {
    let bytes = encode_locations(locations, format).unwrap();
    decode_locations(&bytes, format)
        .unwrap()
        .into_iter()
        .map(|raw| validate_location(raw, &schema()).unwrap())
        .collect()
}

fn service() -> KeysService {
    let area = |id, level, coords: Option<(f64, f64)>| AreaRecord {
        area_peril_id: id,
        peril_id: PerilId::new("QEQ"),
        level,
        latitude: coords.map(|c| c.0),
        longitude: coords.map(|c| c.1),
        country: "US".into(),
        state: None,
        city: None,
    };
    let tables = ReferenceTables::build(
        vec![
            area(1, AreaLevel::Point, Some((34.05, -118.25))),
            area(2, AreaLevel::Point, Some((0.0, 0.0))),
            area(3, AreaLevel::Country, None),
        ],
        vec![VulnerabilityRecord {
            vulnerability_id: 7,
            peril_id: PerilId::new("QEQ"),
            coverage_type: CoverageTypeId::BUILDINGS,
            occupancy_code: "*".into(),
            construction_code: "*".into(),
        }],
    );
    let config = LookupConfiguration::new(
        ModelInfo {
            supplier_id: "Acme".into(),
            model_id: "Quake".into(),
            model_version: "1".into(),
        },
        vec![PerilId::new("QEQ")],
        vec![CoverageTypeId::BUILDINGS, CoverageTypeId::CONTENTS],
        schema(),
    )
    .unwrap();
    KeysService::with_lookup(
        config,
        Arc::new(ReferenceTableLookup::new(tables, 15.0)),
        ResolverSettings {
            concurrency: 4,
            location_timeout: None,
            timeout_abort_threshold: None,
        },
    )
}

// Property: decode(encode(L)) == L for each format
proptest! {
    #[test]
    fn json_round_trip_preserves_locations(locations in locations_strategy()) {
        prop_assert_eq!(round_trip(&locations, Format::Json), locations);
    }

    #[test]
    fn csv_round_trip_preserves_locations(locations in locations_strategy()) {
        prop_assert_eq!(round_trip(&locations, Format::Csv), locations);
    }
}

// Property: decoding never panics
proptest! {
    #[test]
    fn csv_decoding_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = decode_locations(&bytes, Format::Csv);
    }

    #[test]
    fn json_decoding_never_panics(text in "\\PC*") {
        let _ = decode_locations(text.as_bytes(), Format::Json);
    }
}

// Property: every well-formed location is answered, and answers are deterministic
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_valid_location_produces_rows(
        locations in locations_strategy(),
        drop_ids in proptest::collection::vec(any::<bool>(), 20)
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let service = service();

        let raw: Vec<RawLocation> = locations
            .into_iter()
            .enumerate()
            .map(|(idx, location)| {
                let mut raw = RawLocation::from(location);
                raw.row = idx + 1;
                if drop_ids[idx] {
                    raw.location_id = None;
                }
                raw
            })
            .collect();
        let well_formed: HashSet<String> =
            raw.iter().filter_map(|r| r.location_id.clone()).collect();

        let first = runtime.block_on(service.resolve(raw.clone())).unwrap();
        let second = runtime.block_on(service.resolve(raw.clone())).unwrap();

        prop_assert_eq!(first.results.len(), raw.len() * 2);
        let answered: HashSet<String> =
            first.results.iter().filter_map(|r| r.location_id.clone()).collect();
        prop_assert_eq!(answered, well_formed);

        prop_assert_eq!(
            encode_results(&first.results, Format::Csv).unwrap(),
            encode_results(&second.results, Format::Csv).unwrap()
        );
    }
}
