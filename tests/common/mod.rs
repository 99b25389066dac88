//! Keys data directory fixtures shared by integration tests.
#![allow(dead_code)]

use std::path::Path;
use tempfile::TempDir;

pub const AREAS_CSV: &str = "\
area_peril_id,peril_id,level,longitude,latitude,country,state,city
54,QEQ,point,-118.25,34.05,US,CA,Los Angeles
55,QEQ,point,-122.42,37.77,US,CA,San Francisco
60,QEQ,city,,,US,CA,Fresno
90,QEQ,country,,,US,,
154,WTC,point,-118.25,34.05,US,CA,Los Angeles
190,WTC,country,,,US,,
";

pub const VULNERABILITIES_CSV: &str = "\
vulnerability_id,peril_id,coverage_type,occupancy_code,construction_code
8,QEQ,1,1050,5000
9,QEQ,1,*,*
10,QEQ,3,*,*
20,WTC,1,*,*
";

pub const LOOKUP_JSON: &str = r#"{
  "perils": ["QEQ"],
  "coverage_types": [1],
  "area_peril": { "file_path": "%KEYS_DATA_PATH%/areas.csv", "max_distance_km": 15 },
  "vulnerability": { "file_path": "vulnerabilities.csv" }
}"#;

pub fn write_model(dir: &Path, version: &str, lookup_json: &str) {
    std::fs::write(
        dir.join("ModelVersion.csv"),
        format!("Acme,Quake,{}\n", version),
    )
    .unwrap();
    std::fs::write(dir.join("lookup.json"), lookup_json).unwrap();
    std::fs::write(dir.join("areas.csv"), AREAS_CSV).unwrap();
    std::fs::write(dir.join("vulnerabilities.csv"), VULNERABILITIES_CSV).unwrap();
}

/// A keys data directory for model `Acme/Quake/1` resolving QEQ buildings.
pub fn keys_data_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "1", LOOKUP_JSON);
    dir
}
