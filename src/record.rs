use std::fs;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::Serialize;
use serde_json::Value;

use crate::domain::{BoundingBox, DataPolicy, RecordId, UNSPECIFIED_ORGANIZATION};
use crate::error::WiscatError;

const DISCIPLINE_SCHEME: &str = "earth-system-discipline";
const CONTACT_ROLE_PREFERENCE: &[&str] = &["pointOfContact", "producer", "originator"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordLink {
    pub href: String,
    pub rel: Option<String>,
    pub title: Option<String>,
}

/// A discovery metadata record normalized from WCMP2 (GeoJSON) or
/// ISO 19139 (XML).
#[derive(Debug, Clone, Serialize)]
pub struct MetadataRecord {
    pub id: String,
    pub title: String,
    pub organization: Option<String>,
    pub description: Option<String>,
    pub bbox: Option<BoundingBox>,
    pub data_policy: Option<DataPolicy>,
    /// `wmo:dataPolicy` as published, including values outside the known policies.
    pub data_policy_name: Option<String>,
    pub centre_id: Option<String>,
    pub disciplines: Vec<String>,
    pub links: Vec<RecordLink>,
    #[serde(skip)]
    search_text: String,
}

impl MetadataRecord {
    pub fn organization_key(&self) -> &str {
        self.organization
            .as_deref()
            .unwrap_or(UNSPECIFIED_ORGANIZATION)
    }

    /// Lower-cased text that term searches run against.
    pub fn search_text(&self) -> &str {
        &self.search_text
    }

    pub fn record_id(&self) -> RecordId {
        RecordId::from_raw(&self.id)
    }

    pub fn from_path(path: &Path) -> Result<Self, WiscatError> {
        let content = fs::read_to_string(path)
            .map_err(|err| WiscatError::Filesystem(format!("read {}: {err}", path.display())))?;
        match RecordFormat::from_path(path) {
            Some(RecordFormat::Json) => Self::from_json_str(&content),
            Some(RecordFormat::Xml) => Self::from_xml_str(&content),
            None => Err(WiscatError::ResponseParse(format!(
                "unsupported record file type: {}",
                path.display()
            ))),
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self, WiscatError> {
        let value: Value = serde_json::from_str(content)
            .map_err(|err| WiscatError::ResponseParse(err.to_string()))?;
        Self::from_wcmp2(&value)
    }

    /// Parses a WCMP2 GeoJSON feature, as served by the GDC `items`
    /// endpoint and shipped in its archive.
    pub fn from_wcmp2(value: &Value) -> Result<Self, WiscatError> {
        let id = value
            .get("id")
            .and_then(|value| value.as_str())
            .ok_or_else(|| WiscatError::ResponseParse("record is missing \"id\"".to_string()))?
            .to_string();
        let properties = value
            .get("properties")
            .and_then(|value| value.as_object())
            .ok_or_else(|| {
                WiscatError::ResponseParse(format!("record {id} is missing \"properties\""))
            })?;

        let title = properties
            .get("title")
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_string();
        let description = properties
            .get("description")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string());
        let organization = properties
            .get("contacts")
            .and_then(|value| value.as_array())
            .and_then(|contacts| select_contact_organization(contacts));
        let data_policy_name = properties
            .get("wmo:dataPolicy")
            .and_then(|value| match value {
                Value::Object(object) => object.get("name").and_then(|name| name.as_str()),
                other => other.as_str(),
            })
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        let data_policy = data_policy_name
            .as_deref()
            .and_then(|name| name.parse::<DataPolicy>().ok());
        let bbox = value.get("geometry").and_then(|geometry| {
            let mut positions = Vec::new();
            collect_positions(geometry.get("coordinates")?, &mut positions);
            BoundingBox::envelope(positions.iter().map(|point| point.as_slice()))
        });

        let mut keywords = Vec::new();
        let mut disciplines = Vec::new();
        for theme in properties
            .get("themes")
            .and_then(|value| value.as_array())
            .into_iter()
            .flatten()
        {
            let is_discipline = theme
                .get("scheme")
                .and_then(|value| value.as_str())
                .map(|scheme| scheme.ends_with(DISCIPLINE_SCHEME))
                .unwrap_or(false);
            for concept in theme
                .get("concepts")
                .and_then(|value| value.as_array())
                .into_iter()
                .flatten()
            {
                let concept_id = concept.get("id").and_then(|value| value.as_str());
                if let Some(concept_id) = concept_id {
                    keywords.push(concept_id.to_string());
                    if is_discipline {
                        disciplines.push(concept_id.to_string());
                    }
                }
                if let Some(concept_title) = concept.get("title").and_then(|value| value.as_str())
                {
                    keywords.push(concept_title.to_string());
                }
            }
        }
        if let Some(values) = properties.get("keywords").and_then(|value| value.as_array()) {
            keywords.extend(
                values
                    .iter()
                    .filter_map(|value| value.as_str())
                    .map(|value| value.to_string()),
            );
        }

        let links = value
            .get("links")
            .and_then(|value| value.as_array())
            .into_iter()
            .flatten()
            .filter_map(|link| {
                Some(RecordLink {
                    href: link.get("href")?.as_str()?.to_string(),
                    rel: link
                        .get("rel")
                        .and_then(|value| value.as_str())
                        .map(|value| value.to_string()),
                    title: link
                        .get("title")
                        .and_then(|value| value.as_str())
                        .map(|value| value.to_string()),
                })
            })
            .collect();

        let mut parts = vec![id.as_str(), title.as_str()];
        parts.extend(description.as_deref());
        parts.extend(organization.as_deref());
        parts.extend(keywords.iter().map(|value| value.as_str()));
        let search_text = parts.join(" ").to_lowercase();

        let centre_id = RecordId::from_raw(&id).centre_id().map(|value| value.to_string());
        Ok(Self {
            id,
            title,
            organization,
            description,
            bbox,
            data_policy,
            data_policy_name,
            centre_id,
            disciplines,
            links,
            search_text,
        })
    }

    /// Parses an ISO 19139 (WMO Core Profile 1) XML document.
    pub fn from_xml_str(content: &str) -> Result<Self, WiscatError> {
        let mut reader = Reader::from_str(content);
        reader.trim_text(true);

        let mut state = XmlState::default();
        loop {
            let event = reader
                .read_event()
                .map_err(|err| WiscatError::ResponseParse(format!("invalid XML: {err}")))?;
            match event {
                Event::Start(start) => {
                    let name = local_name(&start);
                    state.on_element(&start, &name)?;
                    state.path.push(name);
                }
                Event::Empty(start) => {
                    let name = local_name(&start);
                    state.on_element(&start, &name)?;
                }
                Event::End(_) => {
                    if let Some(name) = state.path.pop() {
                        state.on_end(&name);
                    }
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|err| WiscatError::ResponseParse(format!("invalid XML: {err}")))?;
                    state.on_text(&text);
                }
                Event::CData(data) => {
                    let text = String::from_utf8_lossy(&data).into_owned();
                    state.on_text(&text);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        state.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    Json,
    Xml,
}

impl RecordFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" | "geojson" => Some(RecordFormat::Json),
            "xml" => Some(RecordFormat::Xml),
            _ => None,
        }
    }
}

fn select_contact_organization(contacts: &[Value]) -> Option<String> {
    let organization = |contact: &Value| {
        contact
            .get("organization")
            .and_then(|value| value.as_str())
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(|value| value.to_string())
    };
    let has_role = |contact: &Value, role: &str| {
        contact
            .get("roles")
            .and_then(|value| value.as_array())
            .into_iter()
            .flatten()
            .any(|value| match value {
                Value::String(name) => name.eq_ignore_ascii_case(role),
                Value::Object(object) => object
                    .get("name")
                    .and_then(|name| name.as_str())
                    .map(|name| name.eq_ignore_ascii_case(role))
                    .unwrap_or(false),
                _ => false,
            })
    };

    for role in CONTACT_ROLE_PREFERENCE {
        if let Some(found) = contacts
            .iter()
            .filter(|contact| has_role(contact, role))
            .find_map(organization)
        {
            return Some(found);
        }
    }
    contacts.iter().find_map(organization)
}

fn collect_positions(value: &Value, out: &mut Vec<Vec<f64>>) {
    let Some(items) = value.as_array() else {
        return;
    };
    if items.iter().all(|item| item.is_number()) {
        out.push(items.iter().filter_map(|item| item.as_f64()).collect());
        return;
    }
    for item in items {
        collect_positions(item, out);
    }
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

#[derive(Debug, Default)]
struct Party {
    organization: Option<String>,
    role: Option<String>,
}

#[derive(Debug, Default)]
struct XmlState {
    path: Vec<String>,
    identifier: Option<String>,
    title: Option<String>,
    description: Option<String>,
    party: Option<Party>,
    organization: Option<String>,
    fallback_organization: Option<String>,
    west: Option<f64>,
    east: Option<f64>,
    south: Option<f64>,
    north: Option<f64>,
    links: Vec<RecordLink>,
    text: Vec<String>,
}

impl XmlState {
    fn ends_with(&self, suffix: &[&str]) -> bool {
        self.path.len() >= suffix.len()
            && self.path[self.path.len() - suffix.len()..]
                .iter()
                .zip(suffix)
                .all(|(a, b)| a == b)
    }

    fn within(&self, name: &str) -> bool {
        self.path.iter().any(|element| element == name)
    }

    fn on_element(&mut self, start: &BytesStart<'_>, name: &str) -> Result<(), WiscatError> {
        match name {
            "CI_ResponsibleParty" => self.party = Some(Party::default()),
            "CI_RoleCode" => {
                let value = start
                    .try_get_attribute("codeListValue")
                    .map_err(|err| WiscatError::ResponseParse(format!("invalid XML: {err}")))?;
                if let (Some(party), Some(attr)) = (self.party.as_mut(), value) {
                    let role = attr
                        .unescape_value()
                        .map_err(|err| WiscatError::ResponseParse(format!("invalid XML: {err}")))?;
                    party.role = Some(role.into_owned());
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn on_end(&mut self, name: &str) {
        if name != "CI_ResponsibleParty" {
            return;
        }
        let Some(party) = self.party.take() else {
            return;
        };
        let Some(organization) = party.organization else {
            return;
        };
        if party.role.as_deref() == Some("pointOfContact") {
            if self.organization.is_none() {
                self.organization = Some(organization);
            }
        } else if self.fallback_organization.is_none() {
            self.fallback_organization = Some(organization);
        }
    }

    fn on_text(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.text.push(text.to_string());

        if self.identifier.is_none() && self.ends_with(&["fileIdentifier", "CharacterString"]) {
            self.identifier = Some(text.to_string());
        } else if self.within("identificationInfo")
            && self.title.is_none()
            && self.ends_with(&["citation", "CI_Citation", "title", "CharacterString"])
        {
            self.title = Some(text.to_string());
        } else if self.within("identificationInfo")
            && self.description.is_none()
            && self.ends_with(&["abstract", "CharacterString"])
        {
            self.description = Some(text.to_string());
        } else if self.ends_with(&["organisationName", "CharacterString"]) {
            if let Some(party) = self.party.as_mut() {
                party.organization.get_or_insert_with(|| text.to_string());
            }
        } else if self.ends_with(&["linkage", "URL"]) {
            self.links.push(RecordLink {
                href: text.to_string(),
                rel: None,
                title: None,
            });
        } else if self.ends_with(&["Decimal"]) && self.path.len() >= 2 {
            let bound = self.path[self.path.len() - 2].as_str();
            let slot = match bound {
                "westBoundLongitude" => &mut self.west,
                "eastBoundLongitude" => &mut self.east,
                "southBoundLatitude" => &mut self.south,
                "northBoundLatitude" => &mut self.north,
                _ => return,
            };
            if slot.is_none() {
                *slot = text.parse().ok();
            }
        }
    }

    fn finish(self) -> Result<MetadataRecord, WiscatError> {
        let id = self.identifier.ok_or_else(|| {
            WiscatError::ResponseParse("document has no gmd:fileIdentifier".to_string())
        })?;
        let bbox = match (self.west, self.south, self.east, self.north) {
            (Some(west), Some(south), Some(east), Some(north)) => Some(BoundingBox {
                west,
                south,
                east,
                north,
            }),
            _ => None,
        };
        let centre_id = RecordId::from_raw(&id).centre_id().map(|value| value.to_string());
        Ok(MetadataRecord {
            title: self.title.unwrap_or_default(),
            organization: self.organization.or(self.fallback_organization),
            description: self.description,
            bbox,
            data_policy: None,
            data_policy_name: None,
            centre_id,
            disciplines: Vec::new(),
            links: self.links,
            search_text: self.text.join(" ").to_lowercase(),
            id,
        })
    }
}
