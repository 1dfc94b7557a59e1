mod common;

use std::net::TcpListener;

use assert_matches::assert_matches;
use serde_json::{Value, json};

use wiscat::config::ResolvedConfig;
use wiscat::domain::{BoundingBox, DataPolicy, RecordId, SearchQuery};
use wiscat::error::WiscatError;
use wiscat::gdc::{CatalogueClient, GdcHttpClient};

use common::{FixtureServer, GDC_PATH, Route, wcmp2_record};

const LEGACY_ID: &str = "urn:x-wmo:md:can:eccc-msc:c7c9d726-c48a-49e3-98ab-78a1ab87cda8";

fn client_for(server: &FixtureServer) -> GdcHttpClient {
    GdcHttpClient::new(&ResolvedConfig::with_gdc_url(server.gdc_url())).unwrap()
}

fn record_path(id: &str) -> String {
    format!("{GDC_PATH}/items/{id}")
}

#[test]
fn get_returns_record_with_identical_id() {
    let body = wcmp2_record(LEGACY_ID, "SWOB", "Surface observations", Some("ECCC"), "core");
    let server = FixtureServer::start(vec![Route::json(&record_path(LEGACY_ID), 200, &body)]);
    let client = client_for(&server);

    let id: RecordId = LEGACY_ID.parse().unwrap();
    let fetched = client.get_record(&id).unwrap();
    assert_eq!(fetched.record.id, LEGACY_ID);
    assert_eq!(fetched.record.record_id().country(), Some("can"));
    assert_eq!(fetched.record.centre_id.as_deref(), Some("eccc-msc"));
    assert_eq!(fetched.raw_json["id"], LEGACY_ID);
    assert!(fetched.url.ends_with(LEGACY_ID));
}

#[test]
fn get_sends_reserved_characters_encoded() {
    let raw = "urn:wmo:md:xx-centre:b#x";
    let body = wcmp2_record(raw, "Fragment", "", None, "core");
    let server = FixtureServer::start(vec![Route::json(
        &record_path("urn:wmo:md:xx-centre:b%23x"),
        200,
        &body,
    )]);
    let client = client_for(&server);

    let id: RecordId = raw.parse().unwrap();
    let fetched = client.get_record(&id).unwrap();
    assert_eq!(fetched.record.id, raw);
    assert_eq!(
        server.requests(),
        vec![record_path("urn:wmo:md:xx-centre:b%23x")]
    );
}

#[test]
fn get_unknown_record_is_not_found() {
    let server = FixtureServer::start(Vec::new());
    let client = client_for(&server);
    let id: RecordId = "urn:wmo:md:xx-nowhere:missing".parse().unwrap();
    assert_matches!(client.get_record(&id), Err(WiscatError::NotFound(_)));
}

#[test]
fn get_with_malformed_body_is_parse_error() {
    let server = FixtureServer::start(vec![Route::json(
        &record_path(LEGACY_ID),
        200,
        "<html>maintenance</html>",
    )]);
    let client = client_for(&server);
    let id: RecordId = LEGACY_ID.parse().unwrap();
    assert_matches!(client.get_record(&id), Err(WiscatError::ResponseParse(_)));
}

#[test]
fn server_error_is_remote_unavailable_with_status() {
    let server = FixtureServer::start(vec![Route::json(
        &format!("{GDC_PATH}/items"),
        500,
        "internal error",
    )]);
    let client = client_for(&server);
    let err = client.search(&SearchQuery::default()).unwrap_err();
    assert_matches!(
        err,
        WiscatError::RemoteUnavailable {
            status: Some(500),
            ..
        }
    );
}

#[test]
fn unreachable_catalogue_is_remote_unavailable() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client =
        GdcHttpClient::new(&ResolvedConfig::with_gdc_url(format!("http://127.0.0.1:{port}/gdc")))
            .unwrap();
    assert_matches!(
        client.archive_url(),
        Err(WiscatError::RemoteUnavailable { status: None, .. })
    );
}

#[test]
fn search_sends_filters_and_reads_page() {
    let feature: Value = serde_json::from_str(&wcmp2_record(
        "urn:wmo:md:ca-eccc-msc:swob",
        "SWOB",
        "Surface observations",
        Some("ECCC"),
        "core",
    ))
    .unwrap();
    let body = json!({
        "type": "FeatureCollection",
        "numberMatched": 12,
        "numberReturned": 1,
        "features": [feature],
        "links": [{"rel": "next", "href": "http://gdc.example/items?offset=1"}]
    });
    let server = FixtureServer::start(vec![Route::json(
        &format!("{GDC_PATH}/items"),
        200,
        &body.to_string(),
    )]);
    let client = client_for(&server);

    let query = SearchQuery {
        q: Some("swob".to_string()),
        bbox: Some(BoundingBox::new(-142.0, 42.0, -52.0, 84.0).unwrap()),
        data_policy: Some(DataPolicy::Core),
        limit: Some(5),
        ..SearchQuery::default()
    };
    let page = client.search(&query).unwrap();
    assert_eq!(page.number_matched, Some(12));
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0].title, "SWOB");
    assert_eq!(page.next.as_deref(), Some("http://gdc.example/items?offset=1"));

    let serialized = serde_json::to_value(&page).unwrap();
    assert_eq!(serialized["number_matched"], 12);
    assert_eq!(serialized["next"], "http://gdc.example/items?offset=1");
    assert_eq!(serialized["records"][0]["id"], "urn:wmo:md:ca-eccc-msc:swob");

    let requests = server.requests();
    let target = requests.last().unwrap();
    assert!(target.starts_with(&format!("{GDC_PATH}/items?")));
    assert!(target.contains("q=swob"));
    assert!(target.contains("bbox=-142%2C42%2C-52%2C84"));
    assert!(target.contains("wmo%3AdataPolicy=core"));
    assert!(target.contains("limit=5"));
}

#[test]
fn archive_url_comes_from_collection_links() {
    let collection = json!({
        "id": "wis2-discovery-metadata",
        "links": [
            {"rel": "self", "href": "http://gdc.example/collection"},
            {"rel": "archives", "href": "http://gdc.example/archive.zip", "type": "application/zip"}
        ]
    });
    let server = FixtureServer::start(vec![Route::json(GDC_PATH, 200, &collection.to_string())]);
    let client = client_for(&server);
    assert_eq!(client.archive_url().unwrap(), "http://gdc.example/archive.zip");
}

#[test]
fn missing_archive_link_is_not_found() {
    let collection = json!({"id": "wis2-discovery-metadata", "links": []});
    let server = FixtureServer::start(vec![Route::json(GDC_PATH, 200, &collection.to_string())]);
    let client = client_for(&server);
    assert_matches!(client.archive_url(), Err(WiscatError::NotFound(_)));
}
