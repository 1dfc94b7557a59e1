#![allow(dead_code)]

use std::io::{Cursor, Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use serde_json::json;
use zip::write::SimpleFileOptions;

pub const GDC_PATH: &str = "/collections/wis2-discovery-metadata";

pub struct Route {
    pub path: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl Route {
    pub fn json(path: &str, status: u16, body: &str) -> Self {
        Self {
            path: path.to_string(),
            status,
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn bytes(path: &str, body: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            status: 200,
            body,
        }
    }
}

/// Serves `routes` over plain HTTP on a loopback port, one connection per
/// request. Unknown paths get a 404.
pub struct FixtureServer {
    pub origin: String,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl FixtureServer {
    pub fn start(routes: Vec<Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else {
                    continue;
                };
                let target = read_request_target(&mut stream);
                seen.lock().unwrap().push(target.clone());
                let path = target.split('?').next().unwrap_or_default();
                let (status, body) = routes
                    .iter()
                    .find(|route| route.path == path)
                    .map(|route| (route.status, route.body.clone()))
                    .unwrap_or((404, br#"{"code": "NotFound"}"#.to_vec()));
                let reason = match status {
                    200 => "OK",
                    404 => "Not Found",
                    _ => "Error",
                };
                let headers = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(headers.as_bytes());
                let _ = stream.write_all(&body);
                let _ = stream.flush();
            }
        });
        Self {
            origin: format!("http://{addr}"),
            requests,
        }
    }

    pub fn gdc_url(&self) -> String {
        format!("{}{GDC_PATH}", self.origin)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn read_request_target(stream: &mut impl Read) -> String {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|window| window == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    let text = String::from_utf8_lossy(&request);
    text.lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or_default()
        .to_string()
}

pub fn wcmp2_record(
    id: &str,
    title: &str,
    description: &str,
    organization: Option<&str>,
    data_policy: &str,
) -> String {
    let contacts = match organization {
        Some(organization) => json!([{"organization": organization, "roles": ["producer"]}]),
        None => json!([]),
    };
    json!({
        "id": id,
        "type": "Feature",
        "conformsTo": ["http://wis.wmo.int/spec/wcmp/2/conf/core"],
        "geometry": {
            "type": "Polygon",
            "coordinates": [[[-142.0, 42.0], [-52.0, 42.0], [-52.0, 84.0], [-142.0, 84.0], [-142.0, 42.0]]]
        },
        "properties": {
            "type": "dataset",
            "title": title,
            "description": description,
            "contacts": contacts,
            "wmo:dataPolicy": data_policy,
            "themes": [{
                "concepts": [{"id": "weather"}],
                "scheme": "https://codes.wmo.int/wis/topic-hierarchy/earth-system-discipline"
            }]
        },
        "links": [
            {"rel": "self", "href": "https://example.org/self"},
            {"rel": "data", "href": "mqtts://broker.example.org", "title": "Notifications"}
        ]
    })
    .to_string()
}

pub fn iso_record(identifier: &str, title: &str, abstract_: &str, organization: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd" xmlns:gco="http://www.isotc211.org/2005/gco">
  <gmd:fileIdentifier><gco:CharacterString>{identifier}</gco:CharacterString></gmd:fileIdentifier>
  <gmd:contact>
    <gmd:CI_ResponsibleParty>
      <gmd:organisationName><gco:CharacterString>{organization}</gco:CharacterString></gmd:organisationName>
      <gmd:role><gmd:CI_RoleCode codeList="http://www.isotc211.org/2005/resources/Codelist/gmxCodelists.xml#CI_RoleCode" codeListValue="pointOfContact">pointOfContact</gmd:CI_RoleCode></gmd:role>
    </gmd:CI_ResponsibleParty>
  </gmd:contact>
  <gmd:identificationInfo>
    <gmd:MD_DataIdentification>
      <gmd:citation>
        <gmd:CI_Citation>
          <gmd:title><gco:CharacterString>{title}</gco:CharacterString></gmd:title>
        </gmd:CI_Citation>
      </gmd:citation>
      <gmd:abstract><gco:CharacterString>{abstract_}</gco:CharacterString></gmd:abstract>
      <gmd:extent>
        <gmd:EX_Extent>
          <gmd:geographicElement>
            <gmd:EX_GeographicBoundingBox>
              <gmd:westBoundLongitude><gco:Decimal>-180</gco:Decimal></gmd:westBoundLongitude>
              <gmd:eastBoundLongitude><gco:Decimal>180</gco:Decimal></gmd:eastBoundLongitude>
              <gmd:southBoundLatitude><gco:Decimal>-90</gco:Decimal></gmd:southBoundLatitude>
              <gmd:northBoundLatitude><gco:Decimal>90</gco:Decimal></gmd:northBoundLatitude>
            </gmd:EX_GeographicBoundingBox>
          </gmd:geographicElement>
        </gmd:EX_Extent>
      </gmd:extent>
    </gmd:MD_DataIdentification>
  </gmd:identificationInfo>
</gmd:MD_Metadata>
"#
    )
}

pub fn write_file(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

pub fn zip_bundle(entries: &[(&str, String)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn tar_gz_bundle(entries: &[(&str, String)]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, *name, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}
