// src/pipeline.rs
//! Enrichment pipeline: validation, then labeling and icon acquisition side by side, then label filters.

use crate::cache::FingerprintCache;
use crate::config::EnricherConfig;
use crate::fetcher::{ContentFetcher, FetchSettings};
use crate::http::{PageSource, ReqwestSource};
use crate::images::{apply_icons, plan_downloads, DownloadSummary, ImageManager};
use crate::labeling::{
    apply_label_filters, KnownAuthors, LabelEngine, LabelSettings, LabelingSummary, TriggerTable,
};
use crate::record::PublicationRecord;
use crate::telemetry;
use crate::validation::{find_duplicates, validate_all, DuplicatePair, Rejected};
use anyhow::Result;
use metrics::gauge;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything a run hands back to the export/report collaborators.
#[derive(Debug, Default)]
pub struct EnrichmentOutcome {
    pub records: Vec<PublicationRecord>,
    pub rejected: Vec<Rejected>,
    /// Indices refer to the validated list, before label filters.
    pub duplicates: Vec<DuplicatePair>,
    pub labeling: LabelingSummary,
    pub images: DownloadSummary,
    pub filtered_out: usize,
}

pub struct Enricher {
    cfg: EnricherConfig,
    cache: Arc<FingerprintCache>,
    fetcher: ContentFetcher,
    images: ImageManager,
    labels: LabelEngine,
}

impl Enricher {
    /// Production wiring: reqwest source, tables read from the configured paths
    /// (built-in tables when those files are absent).
    pub fn from_config(cfg: EnricherConfig) -> Result<Self> {
        let source: Arc<dyn PageSource> = Arc::new(ReqwestSource::new(
            &cfg.network.user_agent,
            cfg.network.timeout(),
        )?);
        let table = if cfg.labeling.categories_path.exists() {
            TriggerTable::from_path(&cfg.labeling.categories_path)?
        } else {
            TriggerTable::builtin()?
        };
        let authors = if cfg.labeling.authors_path.exists() {
            KnownAuthors::from_path(&cfg.labeling.authors_path)?
        } else {
            KnownAuthors::builtin()?
        };
        if authors.is_empty() {
            warn!(target: "labeling", "known-author table is empty; author bios will not contribute");
        } else {
            debug!(target: "labeling", authors = authors.len(), "known-author table loaded");
        }
        Ok(Self::with_parts(cfg, source, Arc::new(table), Arc::new(authors)))
    }

    pub fn with_parts(
        cfg: EnricherConfig,
        source: Arc<dyn PageSource>,
        table: Arc<TriggerTable>,
        authors: Arc<KnownAuthors>,
    ) -> Self {
        let cache = Arc::new(if cfg.cache.enabled {
            FingerprintCache::new(&cfg.cache.dir, cfg.cache.expiry_days)
        } else {
            FingerprintCache::disabled()
        });
        let fetcher = ContentFetcher::new(
            source.clone(),
            cache.clone(),
            FetchSettings::from(&cfg.network),
        );
        let images = ImageManager::new(source, cfg.images.workers, cfg.network.timeout());
        let labels = LabelEngine::new(
            table,
            authors,
            LabelSettings {
                skip_if_labeled: cfg.labeling.skip_if_labeled,
                analyze_content: cfg.labeling.analyze_content,
                extract_metadata: cfg.labeling.extract_metadata,
            },
        );
        Self {
            cfg,
            cache,
            fetcher,
            images,
            labels,
        }
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    pub async fn run(&self, records: Vec<PublicationRecord>) -> EnrichmentOutcome {
        telemetry::ensure_described();
        let total = records.len();

        // 1) Validation + duplicate report
        let (mut records, rejected) = if self.cfg.validation.enabled {
            validate_all(records, self.cfg.validation.strict)
        } else {
            (records, Vec::new())
        };
        let duplicates = if self.cfg.validation.enabled {
            find_duplicates(&records, self.cfg.validation.duplicate_threshold)
        } else {
            Vec::new()
        };
        for d in &duplicates {
            warn!(
                target: "validation",
                first = %records[d.first].name,
                second = %records[d.second].name,
                similarity = d.similarity,
                same_link = d.same_link,
                "probable duplicate publications"
            );
        }

        // 2) Labeling and icon downloads run side by side; they share only the cache.
        let image_dir = self.cfg.images.dir.clone();
        let tasks = if self.cfg.images.enabled {
            plan_downloads(&records, &image_dir)
        } else {
            Vec::new()
        };
        let workers = self.cfg.images.workers;
        let (labeling, image_results) = tokio::join!(
            self.labels
                .label_records(&mut records, Some(&self.fetcher), workers),
            self.images.run(tasks)
        );
        apply_icons(&mut records, &image_dir, &image_results);
        let images = DownloadSummary::from_results(&image_results);

        // 3) Post-filters
        let before = records.len();
        let records = apply_label_filters(
            records,
            &self.cfg.labeling.include_labels,
            &self.cfg.labeling.exclude_labels,
        );
        let filtered_out = before - records.len();

        gauge!(telemetry::LAST_RUN_TS).set(chrono::Utc::now().timestamp().max(0) as f64);
        info!(
            target: "pipeline",
            total,
            kept = records.len(),
            rejected = rejected.len(),
            duplicates = duplicates.len(),
            filtered_out,
            images_reused = images.reused,
            images_downloaded = images.downloaded,
            images_failed = images.failed,
            "enrichment run finished"
        );

        EnrichmentOutcome {
            records,
            rejected,
            duplicates,
            labeling,
            images,
            filtered_out,
        }
    }
}
