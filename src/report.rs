use std::collections::BTreeMap;

use clap::ValueEnum;
use serde::Serialize;

use crate::domain::{DataPolicy, MatchMode, UNSPECIFIED_ORGANIZATION};
use crate::error::WiscatError;
use crate::record::MetadataRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Grouping {
    #[default]
    Organization,
    /// Citation authority from the identifier, then organization.
    Authority,
}

impl Grouping {
    fn empty<T>(self) -> Grouped<T> {
        match self {
            Grouping::Organization => Grouped::ByOrganization(BTreeMap::new()),
            Grouping::Authority => Grouped::ByAuthority(BTreeMap::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Grouped<T> {
    ByOrganization(BTreeMap<String, T>),
    ByAuthority(BTreeMap<String, BTreeMap<String, T>>),
}

impl<T: Default> Grouped<T> {
    fn bucket(&mut self, record: &MetadataRecord) -> &mut T {
        let organization = record.organization_key().to_string();
        match self {
            Grouped::ByOrganization(map) => map.entry(organization).or_default(),
            Grouped::ByAuthority(map) => {
                let authority = record
                    .record_id()
                    .citation_authority()
                    .unwrap_or(UNSPECIFIED_ORGANIZATION)
                    .to_string();
                map.entry(authority)
                    .or_default()
                    .entry(organization)
                    .or_default()
            }
        }
    }
}

impl<T> Grouped<T> {
    pub fn is_empty(&self) -> bool {
        match self {
            Grouped::ByOrganization(map) => map.is_empty(),
            Grouped::ByAuthority(map) => map.is_empty(),
        }
    }

    /// Buckets flattened to `(authority, organization, value)`.
    pub fn entries(&self) -> Vec<(Option<&str>, &str, &T)> {
        match self {
            Grouped::ByOrganization(map) => map
                .iter()
                .map(|(org, value)| (None, org.as_str(), value))
                .collect(),
            Grouped::ByAuthority(map) => map
                .iter()
                .flat_map(|(authority, orgs)| {
                    orgs.iter()
                        .map(move |(org, value)| (Some(authority.as_str()), org.as_str(), value))
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordMatch {
    pub id: String,
    pub title: String,
}

pub fn matches_terms(record: &MetadataRecord, terms: &[String], mode: MatchMode) -> bool {
    mode.matches(record.search_text(), terms)
}

/// Records matching `terms`, bucketed by organization in input order.
pub fn terms_by_organization(
    records: &[MetadataRecord],
    terms: &[String],
    mode: MatchMode,
    grouping: Grouping,
) -> Result<Grouped<Vec<RecordMatch>>, WiscatError> {
    if terms.iter().all(|term| term.trim().is_empty()) {
        return Err(WiscatError::InvalidArgument(
            "at least one non-empty search term is required".to_string(),
        ));
    }
    let terms = terms
        .iter()
        .filter(|term| !term.trim().is_empty())
        .cloned()
        .collect::<Vec<_>>();

    let mut grouped: Grouped<Vec<RecordMatch>> = grouping.empty();
    for record in records
        .iter()
        .filter(|record| matches_terms(record, &terms, mode))
    {
        grouped.bucket(record).push(RecordMatch {
            id: record.id.clone(),
            title: record.title.clone(),
        });
    }
    Ok(grouped)
}

pub fn records_by_organization(records: &[MetadataRecord], grouping: Grouping) -> Grouped<usize> {
    let mut grouped: Grouped<usize> = grouping.empty();
    for record in records {
        *grouped.bucket(record) += 1;
    }
    grouped
}

pub fn data_policy_by_centre(
    records: &[MetadataRecord],
    policy: DataPolicy,
) -> BTreeMap<String, usize> {
    let mut report: BTreeMap<String, usize> = BTreeMap::new();
    for record in records
        .iter()
        .filter(|record| record.data_policy == Some(policy))
    {
        *report.entry(centre_key(record)).or_default() += 1;
    }
    report
}

pub fn disciplines_by_centre(records: &[MetadataRecord]) -> BTreeMap<String, BTreeMap<String, usize>> {
    let mut report: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    for record in records {
        for discipline in &record.disciplines {
            *report
                .entry(centre_key(record))
                .or_default()
                .entry(discipline.clone())
                .or_default() += 1;
        }
    }
    report
}

fn centre_key(record: &MetadataRecord) -> String {
    record
        .centre_id
        .clone()
        .unwrap_or_else(|| UNSPECIFIED_ORGANIZATION.to_string())
}
