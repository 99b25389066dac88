use rust_keys_server::errors::TranscodingError;
use rust_keys_server::models::{AttributeValue, CoverageTypeId, KeyResult, PerilId};
use rust_keys_server::transcoding::{decode_locations, encode_results, Format};

fn malformed(result: Result<impl std::fmt::Debug, TranscodingError>) -> String {
    match result {
        Err(TranscodingError::MalformedInput(msg)) => msg,
        other => panic!("expected MalformedInput, got {:?}", other),
    }
}

#[test]
fn csv_header_is_case_insensitive_and_bom_tolerant() {
    let payload = "\u{feff}LocationID, Latitude ,CountryCode\nL1,34.05,US\n";
    let rows = decode_locations(payload.as_bytes(), Format::Csv).unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].row, 1);
    assert_eq!(rows[0].location_id.as_deref(), Some("L1"));
    assert_eq!(
        rows[0].attributes["latitude"],
        AttributeValue::Text("34.05".into())
    );
    assert_eq!(
        rows[0].attributes["countrycode"],
        AttributeValue::Text("US".into())
    );
}

#[test]
fn csv_with_only_a_header_has_no_rows() {
    let rows = decode_locations(b"loc_id,latitude\n", Format::Csv).unwrap();
    assert!(rows.is_empty());
}

#[test]
fn csv_cells_keep_surrounding_whitespace() {
    let rows = decode_locations(b"id,countrycode,note\n L1 , US ,\n", Format::Csv).unwrap();

    assert_eq!(rows[0].location_id.as_deref(), Some("L1"));
    assert_eq!(
        rows[0].attributes["countrycode"],
        AttributeValue::Text(" US ".into())
    );
    assert!(!rows[0].attributes.contains_key("note"));
}

#[test]
fn csv_blank_id_cell_is_absent_id() {
    let rows = decode_locations(b"id,latitude\n,1.5\nL2,2\n", Format::Csv).unwrap();
    assert_eq!(rows[0].location_id, None);
    assert_eq!(rows[1].location_id.as_deref(), Some("L2"));
    assert_eq!(rows[1].row, 2);
}

#[test]
fn csv_structural_errors_are_malformed() {
    let msg = malformed(decode_locations(b"id,lat\nL1,1,extra\n", Format::Csv));
    assert!(msg.starts_with("row 1"), "{}", msg);

    let msg = malformed(decode_locations(b"id,lat,LAT\nL1,1,2\n", Format::Csv));
    assert!(msg.contains("duplicate column 'lat'"), "{}", msg);

    malformed(decode_locations(b"", Format::Csv));
    malformed(decode_locations(b"id,lat\nL1,\xff\xfe\n", Format::Csv));
}

#[test]
fn json_values_keep_their_types() {
    let payload = br#"[{"LocationId": 17, "Latitude": 34.05, "OccupancyCode": "1050", "City": null}]"#;
    let rows = decode_locations(payload, Format::Json).unwrap();

    assert_eq!(rows[0].location_id.as_deref(), Some("17"));
    assert_eq!(rows[0].attributes["latitude"], AttributeValue::Number(34.05));
    assert_eq!(
        rows[0].attributes["occupancycode"],
        AttributeValue::Text("1050".into())
    );
    assert!(!rows[0].attributes.contains_key("city"));
}

#[test]
fn json_without_id_key_decodes_with_absent_id() {
    let rows = decode_locations(br#"[{"latitude": 1}]"#, Format::Json).unwrap();
    assert_eq!(rows[0].location_id, None);
}

#[test]
fn json_shape_errors_are_malformed() {
    malformed(decode_locations(br#"{"id": "L1"}"#, Format::Json));
    malformed(decode_locations(br#"[1, 2]"#, Format::Json));

    let msg = malformed(decode_locations(
        br#"[{"id": "L1"}, {"id": "L2", "Lat": 1, "lat": 2}]"#,
        Format::Json,
    ));
    assert_eq!(msg, "row 2: duplicate field 'lat'");
}

#[test]
fn json_non_scalar_values_only_mark_their_record() {
    let payload = br#"[
        {"location_id": "L1", "latitude": 34.05},
        {"location_id": "L2", "latitude": true},
        {"id": true}
    ]"#;
    let rows = decode_locations(payload, Format::Json).unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].invalid, None);
    assert_eq!(rows[0].attributes["latitude"], AttributeValue::Number(34.05));
    assert_eq!(rows[1].location_id.as_deref(), Some("L2"));
    assert_eq!(
        rows[1].invalid.as_deref(),
        Some("malformed latitude: expected a scalar, got true")
    );
    assert!(!rows[1].attributes.contains_key("latitude"));
    assert_eq!(rows[2].location_id, None);
    assert!(rows[2]
        .invalid
        .as_deref()
        .is_some_and(|m| m.starts_with("malformed location id")));
}

#[test]
fn json_results_use_the_success_envelope() {
    let rows = vec![
        KeyResult::success("L1", PerilId::new("QEQ"), CoverageTypeId::BUILDINGS, 54, 8, ""),
        KeyResult::fail(None, PerilId::new("QEQ"), CoverageTypeId::BUILDINGS, "missing locationId"),
    ];
    let bytes = encode_results(&rows, Format::Json).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(json["status"], "success");
    assert_eq!(json["items"][0]["status"], "success");
    assert_eq!(json["items"][0]["vulnerability_id"], 8);
    assert_eq!(json["items"][1]["status"], "fail");
    assert_eq!(json["items"][1]["location_id"], serde_json::Value::Null);
    assert_eq!(json["items"][1]["area_peril_id"], serde_json::Value::Null);
}

#[test]
fn csv_results_quote_messages() {
    let rows = vec![KeyResult::no_match(
        "L1",
        PerilId::new("WTC"),
        CoverageTypeId::CONTENTS,
        "no area peril found for WTC in JP; no vulnerability, sorry",
    )];
    let text = String::from_utf8(encode_results(&rows, Format::Csv).unwrap()).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(
        lines[1],
        "L1,WTC,3,nomatch,,,\"no area peril found for WTC in JP; no vulnerability, sorry\""
    );
}

#[test]
fn empty_result_set_still_has_a_header() {
    let text = String::from_utf8(encode_results(&[], Format::Csv).unwrap()).unwrap();
    assert_eq!(
        text.trim_end(),
        "location_id,peril_id,coverage_type,status,area_peril_id,vulnerability_id,message"
    );
}
