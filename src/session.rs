//! One browsing session: the catalog of the current archive, the statistics
//! store and the equivalence rule, passed around explicitly.

use anyhow::{Result, bail};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use crate::catalog::{Catalog, build_catalog};
use crate::config::Settings;
use crate::equivalence::{AdjacentNumberRule, EquivalenceRule};
use crate::error::CatalogError;
use crate::extract::extract_hymn;
use crate::query::{HymnInfo, QueryFacade};
use crate::recent::{PruneReport, prune_oldest};
use crate::recorder::{QueryRecorder, RecorderConfig};
use crate::stats::StatisticsStore;

#[derive(Debug, Clone, Serialize)]
pub struct LaunchOutcome {
    pub path: PathBuf,
    pub reused: bool,
    pub hymn: HymnInfo,
    pub pruned: PruneReport,
}

pub struct Session {
    settings: Settings,
    catalog: Catalog,
    stats: Arc<StatisticsStore>,
    rule: Box<dyn EquivalenceRule>,
}

impl Session {
    /// Builds the catalog first; an unreadable archive ends the session
    /// before the statistics file is touched.
    pub fn open(settings: Settings) -> Result<Self, CatalogError> {
        let catalog = build_catalog(&settings.archive_path, &settings.catalog_options())?;
        let stats = Arc::new(StatisticsStore::open(settings.stats_path.clone(), settings.max_hymns));
        Ok(Self {
            settings,
            catalog,
            stats,
            rule: Box::new(AdjacentNumberRule),
        })
    }

    pub fn with_rule(mut self, rule: Box<dyn EquivalenceRule>) -> Self {
        self.rule = rule;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn stats(&self) -> &Arc<StatisticsStore> {
        &self.stats
    }

    pub fn rule(&self) -> &dyn EquivalenceRule {
        self.rule.as_ref()
    }

    pub fn facade(&self) -> QueryFacade<'_> {
        QueryFacade::new(&self.catalog, &self.stats, self.rule.as_ref())
    }

    pub fn recorder(&self, config: RecorderConfig) -> QueryRecorder {
        QueryRecorder::new(Arc::clone(&self.stats), config)
    }

    /// Replaces the catalog with one built from `archive_path`. On failure the
    /// current catalog stays in place.
    pub fn reload_archive(&mut self, archive_path: &Path) -> Result<(), CatalogError> {
        match build_catalog(archive_path, &self.settings.catalog_options()) {
            Ok(catalog) => {
                info!("Switched archive to {}", archive_path.display());
                self.catalog = catalog;
                self.settings.archive_path = archive_path.to_path_buf();
                Ok(())
            }
            Err(err) => {
                error!("{err}. Keeping the current archive");
                Err(err)
            }
        }
    }

    pub fn launch(&self, input: &str, completion: Option<&str>) -> Result<LaunchOutcome> {
        let hymn = self.facade().query(input, completion);
        let (Some(number), Some(category)) = (hymn.number, hymn.category) else {
            bail!("Nothing to launch for {input:?}");
        };
        if !hymn.ready {
            bail!("Hymn #{number} is not available");
        }

        let extracted = extract_hymn(
            &self.settings.archive_path,
            category,
            number,
            &self.settings.extension,
            &self.settings.temp_dir,
        )?;
        self.stats.record_access(number, true, true)?;

        let pruned = prune_oldest(
            &self.settings.temp_dir,
            &self.settings.extension,
            self.settings.recent_limit,
            false,
        )?;

        Ok(LaunchOutcome {
            path: extracted.path,
            reused: extracted.reused,
            hymn: self.facade().info(number),
            pruned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::write_archive;
    use crate::catalog::{Category, HymnNumber};
    use crate::config::{PRESENTATION_EXTENSION, RECENT_LIMITS};
    use crate::error::ArchiveFault;

    fn settings(dir: &Path) -> Settings {
        Settings {
            archive_path: dir.join("hymns.sda"),
            stats_path: dir.join("data").join("data.json"),
            temp_dir: dir.join("temp"),
            max_hymns: 5,
            extension: PRESENTATION_EXTENSION.to_string(),
            recent_limit: RECENT_LIMITS.min,
        }
    }

    #[test]
    fn launch_extracts_and_counts_query_and_launch() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = settings(dir.path());
        write_archive(
            &settings.archive_path,
            &["EN/001 Holy.pptx", "TL/002 Banal.pptx", "EN/003 Grace.pptx"],
        )?;
        let session = Session::open(settings)?;

        let outcome = session.launch("001", None)?;
        assert_eq!(outcome.path, dir.path().join("temp").join("001 Holy.pptx"));
        assert!(outcome.path.exists());
        assert!(!outcome.reused);
        assert_eq!(outcome.hymn.queries, 1);
        assert_eq!(outcome.hymn.launches, 1);

        let again = session.launch("001", None)?;
        assert!(again.reused);
        assert_eq!(session.stats().entry(HymnNumber(1)).launches, 2);
        Ok(())
    }

    #[test]
    fn launch_refuses_missing_hymns() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = settings(dir.path());
        write_archive(&settings.archive_path, &["EN/001 Holy.pptx"])?;
        let session = Session::open(settings)?;

        assert!(session.launch("004", None).is_err());
        assert!(session.launch("abc", None).is_err());
        assert_eq!(session.stats().aggregate().total_launches, 0);
        Ok(())
    }

    #[test]
    fn launch_prunes_recent_files_to_the_limit() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = settings(dir.path());
        write_archive(
            &settings.archive_path,
            &["EN/001 A.pptx", "EN/002 B.pptx", "EN/003 C.pptx", "EN/004 D.pptx", "EN/005 E.pptx"],
        )?;
        let session = Session::open(settings)?;

        for n in ["001", "002", "003", "004", "005"] {
            session.launch(n, None)?;
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        let remaining = crate::recent::list_recent(&dir.path().join("temp"), "pptx")?;
        assert_eq!(remaining.len(), RECENT_LIMITS.min);
        assert!(dir.path().join("temp").join("005 E.pptx").exists());
        Ok(())
    }

    #[test]
    fn unreadable_archive_is_fatal_before_statistics_are_touched() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = settings(dir.path());
        let stats_path = settings.stats_path.clone();

        let err = Session::open(settings).err();
        assert!(matches!(
            err,
            Some(CatalogError::ArchiveUnreadable {
                source: ArchiveFault::Io(_),
                ..
            })
        ));
        assert!(!stats_path.exists());
        Ok(())
    }

    #[test]
    fn failed_reload_keeps_previous_catalog() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = settings(dir.path());
        write_archive(&settings.archive_path, &["EN/001 Holy.pptx"])?;
        let mut session = Session::open(settings)?;

        let broken = dir.path().join("broken.sda");
        std::fs::write(&broken, b"nope")?;
        assert!(session.reload_archive(&broken).is_err());
        assert_eq!(session.catalog().totals().all, 1);

        let replacement = dir.path().join("other.sda");
        write_archive(&replacement, &["EN/001 Holy.pptx", "EN/002 Two.pptx"])?;
        session.reload_archive(&replacement)?;
        assert_eq!(session.catalog().totals().all, 2);
        assert_eq!(session.settings().archive_path, replacement);
        Ok(())
    }

    struct SameNumberRule;

    impl EquivalenceRule for SameNumberRule {
        fn equivalent_number(&self, number: HymnNumber, _found_in: Category) -> Option<HymnNumber> {
            Some(number)
        }
    }

    #[test]
    fn custom_rule_drives_queries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = settings(dir.path());
        write_archive(&settings.archive_path, &["EN/003 Three.pptx", "TL/003 Tatlo.pptx"])?;

        let adjacent = Session::open(settings.clone())?;
        assert_eq!(adjacent.facade().query("003", None).equivalent_number, None);
        drop(adjacent);

        let session = Session::open(settings)?.with_rule(Box::new(SameNumberRule));
        let info = session.facade().query("003", None);
        assert_eq!(info.equivalent_title, "Tatlo");
        assert_eq!(info.equivalent_number, Some(HymnNumber(3)));
        Ok(())
    }
}
