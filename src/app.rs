use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use serde::Serialize;
use tracing::{info, warn};

use crate::bundle::{self, BundleFormat, CacheManifest};
use crate::config::ResolvedConfig;
use crate::domain::{DataPolicy, MatchMode, RecordId, SearchQuery};
use crate::error::WiscatError;
use crate::gdc::{CatalogueClient, FetchedRecord, SearchPage};
use crate::index::{self, LoadedRecords, ParseWarning, RecordSource};
use crate::report::{self, Grouped, Grouping, RecordMatch};

#[derive(Debug, Clone, Serialize)]
pub struct CacheResult {
    pub directory: String,
    pub source_url: String,
    pub file_count: usize,
    pub downloaded_at: String,
    /// Manifest of the cache this run replaced, if there was one.
    pub previous: Option<CacheManifest>,
}

/// Which catalogue `cache` downloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheSource {
    /// WIS2 Global Discovery Catalogue archive (zip).
    #[default]
    Gdc,
    /// WIS1 catalogue dump (tar.gz).
    Wis1,
}

/// Output of a report over local records, with the files that were skipped.
#[derive(Debug, Clone, Serialize)]
pub struct ReportResult<T> {
    pub analyzed: usize,
    pub results: T,
    pub skipped: Vec<ParseWarning>,
}

impl<T> ReportResult<T> {
    fn new(loaded: LoadedRecords, results: T) -> Self {
        Self {
            analyzed: loaded.records.len(),
            results,
            skipped: loaded.warnings,
        }
    }
}

pub type TermsReport = ReportResult<Grouped<Vec<RecordMatch>>>;
pub type CountReport = ReportResult<Grouped<usize>>;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<C: CatalogueClient> {
    config: ResolvedConfig,
    catalogue: C,
}

impl<C: CatalogueClient> App<C> {
    pub fn new(config: ResolvedConfig, catalogue: C) -> Self {
        Self { config, catalogue }
    }

    /// Downloads the catalogue archive and replaces `directory` with it.
    pub fn cache(
        &self,
        directory: &Utf8Path,
        source: CacheSource,
        sink: &dyn ProgressSink,
    ) -> Result<CacheResult, WiscatError> {
        let directory = bundle::resolve_target(directory)?;
        sink.event(ProgressEvent {
            message: "phase=Resolve; locating metadata archive".to_string(),
            elapsed: None,
        });
        let source_url = match (source, &self.config.bundle_url) {
            (CacheSource::Wis1, _) => self.config.wis1_url.clone(),
            (CacheSource::Gdc, Some(url)) => url.clone(),
            (CacheSource::Gdc, None) => self.catalogue.archive_url()?,
        };
        let previous = match bundle::read_manifest(&directory) {
            Ok(previous) => previous,
            Err(err) => {
                warn!("ignoring unreadable cache manifest: {err}");
                None
            }
        };
        if let Some(previous) = &previous {
            info!(
                "replacing cache of {} downloaded at {}",
                previous.source_url, previous.downloaded_at
            );
        }

        sink.event(ProgressEvent {
            message: format!("phase=Fetch; downloading {source_url}"),
            elapsed: None,
        });
        let start = Instant::now();
        let archive = self.catalogue.download(&source_url)?;
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; received {} bytes", archive.len()),
            elapsed: Some(start.elapsed()),
        });

        sink.event(ProgressEvent {
            message: format!("phase=Store; extracting to {directory}"),
            elapsed: None,
        });
        let format = match source {
            CacheSource::Wis1 => BundleFormat::TarGz,
            CacheSource::Gdc => BundleFormat::from_url(&source_url),
        };
        let manifest = bundle::install_bundle(&archive, format, &directory, &source_url)?;
        info!(
            "cached {} files from {} in {}",
            manifest.file_count, source_url, directory
        );

        Ok(CacheResult {
            directory: directory.to_string(),
            source_url,
            file_count: manifest.file_count,
            downloaded_at: manifest.downloaded_at,
            previous,
        })
    }

    pub fn terms_by_org(
        &self,
        source: &RecordSource,
        terms: &[String],
        mode: MatchMode,
        grouping: Grouping,
    ) -> Result<TermsReport, WiscatError> {
        let loaded = index::load_records(source)?;
        let results = report::terms_by_organization(&loaded.records, terms, mode, grouping)?;
        Ok(ReportResult::new(loaded, results))
    }

    pub fn records_by_org(
        &self,
        source: &RecordSource,
        grouping: Grouping,
    ) -> Result<CountReport, WiscatError> {
        let loaded = index::load_records(source)?;
        let results = report::records_by_organization(&loaded.records, grouping);
        Ok(ReportResult::new(loaded, results))
    }

    pub fn data_policy_metrics(
        &self,
        source: &RecordSource,
        policy: DataPolicy,
    ) -> Result<ReportResult<BTreeMap<String, usize>>, WiscatError> {
        let loaded = index::load_records(source)?;
        let results = report::data_policy_by_centre(&loaded.records, policy);
        Ok(ReportResult::new(loaded, results))
    }

    pub fn discipline_metrics(
        &self,
        source: &RecordSource,
    ) -> Result<ReportResult<BTreeMap<String, BTreeMap<String, usize>>>, WiscatError> {
        let loaded = index::load_records(source)?;
        let results = report::disciplines_by_centre(&loaded.records);
        Ok(ReportResult::new(loaded, results))
    }

    pub fn search(&self, query: &SearchQuery) -> Result<SearchPage, WiscatError> {
        self.catalogue.search(query)
    }

    pub fn get(&self, id: &RecordId) -> Result<FetchedRecord, WiscatError> {
        self.catalogue.get_record(id)
    }
}
