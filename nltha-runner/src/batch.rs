//! Batch execution: IDA records in parallel, MSA stripes one after another
//!
//! Each IDA record is traced on a blocking worker that owns its own response
//! driver. Outcomes come back over a channel tagged with the record's input
//! position, so reports keep manifest order whatever the completion order.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use nltha_core::analysis::msa::StripeRecord;
use nltha_core::analysis::{IdaAnalysis, StripeAnalysis, StripeResult};
use nltha_core::driver::{DriftModel, ResponseDriver, ThresholdDriver};
use nltha_core::error::{NlthaError, NlthaResult};
use nltha_core::records::{RecordEntry, RecordStore};

use crate::executor::{ExecutorSettings, OpenSeesExecutor};
use crate::models::RecordReport;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    Config(#[from] NlthaError),
    #[error("Worker pool error: {0}")]
    Worker(String),
}

/// Which response driver each worker builds
#[derive(Debug, Clone)]
pub enum DriverKind {
    OpenSees(ExecutorSettings),
    /// Deterministic stub: survives up to `threshold` scale, drift proportional to scale
    DryRun { threshold: f64, drift_per_unit: f64 },
}

impl DriverKind {
    pub fn build(&self) -> Box<dyn ResponseDriver + Send> {
        match self {
            Self::OpenSees(settings) => Box::new(OpenSeesExecutor::new(settings.clone())),
            Self::DryRun {
                threshold,
                drift_per_unit,
            } => Box::new(ThresholdDriver::new(*threshold, DriftModel::Proportional(*drift_per_unit))),
        }
    }
}

/// One MSA stripe: a sub-directory of the ground-motion directory
#[derive(Debug, Clone, PartialEq)]
pub struct StripeDir {
    pub name: String,
    pub dir: PathBuf,
}

/// Stripe directories of `gm_dir`, sorted by name
pub fn discover_stripes(gm_dir: &Path) -> NlthaResult<Vec<StripeDir>> {
    let entries = fs::read_dir(gm_dir).map_err(|e| {
        NlthaError::config("gm_dir", format!("cannot list {}: {}", gm_dir.display(), e))
    })?;

    let mut stripes = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            stripes.push(StripeDir {
                name: entry.file_name().to_string_lossy().to_string(),
                dir: entry.path(),
            });
        }
    }
    stripes.sort_by(|a, b| a.name.cmp(&b.name));

    if stripes.is_empty() {
        return Err(NlthaError::config(
            "gm_dir",
            format!("MSA needs one sub-directory per stripe in {}", gm_dir.display()),
        ));
    }
    Ok(stripes)
}

/// Read the manifest of every store; the first unreadable or inconsistent one aborts
pub fn read_manifests(stores: &[RecordStore]) -> NlthaResult<Vec<Vec<RecordEntry>>> {
    stores.iter().map(RecordStore::entries).collect()
}

pub struct BatchRunner {
    driver: DriverKind,
    workers: usize,
}

impl BatchRunner {
    pub fn new(driver: DriverKind, workers: usize) -> Self {
        Self {
            driver,
            workers: workers.max(1),
        }
    }

    /// Trace every record of the store. Manifest errors abort the batch;
    /// record-level failures become failed reports.
    ///
    /// `on_report` sees each report as soon as its worker finishes, in completion order.
    pub async fn run_ida<F>(
        &self,
        ida: &IdaAnalysis,
        store: &RecordStore,
        mut on_report: F,
    ) -> Result<Vec<RecordReport>, BatchError>
    where
        F: FnMut(&RecordReport),
    {
        let entries = store.entries()?;
        let total = entries.len();
        tracing::info!("IDA: {} record(s), {} worker(s)", total, self.workers);

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let (tx, mut rx) = mpsc::channel::<RecordReport>(total.max(1));
        let mut names = Vec::with_capacity(total);

        for (index, entry) in entries.into_iter().enumerate() {
            names.push(entry.name.clone());
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| BatchError::Worker(e.to_string()))?;
            let tx = tx.clone();
            let store = store.clone();
            let ida = ida.clone();
            let driver = self.driver.clone();

            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let report = trace_entry(index, &entry, &store, &ida, &driver);
                if tx.blocking_send(report).is_err() {
                    tracing::warn!("Result channel closed before {} was reported", entry.name);
                }
            });
        }
        drop(tx);

        let mut slots: Vec<Option<RecordReport>> = vec![None; total];
        while let Some(report) = rx.recv().await {
            on_report(&report);
            let index = report.index;
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(report);
            }
        }

        let reports = slots
            .into_iter()
            .zip(names)
            .enumerate()
            .map(|(index, (slot, name))| {
                slot.unwrap_or_else(|| {
                    tracing::error!("Worker for {} ended without a result", name);
                    RecordReport::failed(index, &name, "worker ended without a result")
                })
            })
            .collect();
        Ok(reports)
    }

    /// Run every stripe in order on a single driver
    pub async fn run_msa(
        &self,
        stripes: &StripeAnalysis,
        dirs: Vec<StripeDir>,
        stores: Vec<RecordStore>,
    ) -> Result<Vec<StripeResult>, BatchError> {
        stripes.check_stripe_count(dirs.len())?;
        let manifests = read_manifests(&stores)?;
        let stripes = stripes.clone();
        let driver = self.driver.clone();

        tokio::task::spawn_blocking(move || {
            let mut driver = driver.build();
            dirs.iter()
                .zip(stores.iter().zip(&manifests))
                .enumerate()
                .map(|(index, (dir, (store, entries)))| {
                    run_stripe(&stripes, index, dir, store, entries, driver.as_mut())
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| BatchError::Worker(e.to_string()))
    }
}

fn trace_entry(
    index: usize,
    entry: &RecordEntry,
    store: &RecordStore,
    ida: &IdaAnalysis,
    driver: &DriverKind,
) -> RecordReport {
    let record = match store.load(entry) {
        Ok(record) => record,
        Err(e) => {
            tracing::error!("Skipping {}: {}", entry.name, e);
            return RecordReport::failed(index, &entry.name, e);
        }
    };

    let mut driver = driver.build();
    match ida.trace(&record, driver.as_mut()) {
        Ok(capacity) => {
            tracing::info!(
                "[{}] {} run(s), {:?}, capacity {:?}",
                record.name,
                capacity.runs.len(),
                capacity.termination,
                capacity.capacity.map(|c| c.im)
            );
            RecordReport::traced(index, capacity)
        }
        Err(e) => {
            tracing::error!("[{}] IDA aborted: {}", record.name, e);
            RecordReport::failed(index, &record.name, e)
        }
    }
}

fn run_stripe(
    stripes: &StripeAnalysis,
    index: usize,
    dir: &StripeDir,
    store: &RecordStore,
    entries: &[RecordEntry],
    driver: &mut (dyn ResponseDriver + Send),
) -> StripeResult {
    tracing::info!("MSA stripe {} ({})", index + 1, dir.name);

    let mut records = Vec::new();
    let mut failures = Vec::new();
    for entry in entries {
        match store.load(entry) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::error!("[{}] skipping {}: {}", dir.name, entry.name, e);
                failures.push((entry.name.clone(), e.to_string()));
            }
        }
    }

    let mut result = stripes.run_stripe(&dir.name, index, &records, driver);
    result.records.extend(failures.into_iter().map(|(record, error)| StripeRecord {
        record,
        run: None,
        error: Some(error),
    }));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordStatus;
    use crate::output::OutputWriter;
    use nltha_core::analysis::{AnalysisOptions, IntensityBasis};
    use nltha_core::records::GroundMotionManifest;

    fn write_records(dir: &Path, names: &[&str]) {
        fs::create_dir_all(dir).unwrap();
        let mut list = String::new();
        let mut dts = String::new();
        for (i, name) in names.iter().enumerate() {
            let accel: Vec<String> = (0..100)
                .map(|k| format!("{:.5}", 0.1 * (i as f64 + 1.0) * (k as f64 * 0.3).sin()))
                .collect();
            fs::write(dir.join(format!("{}.txt", name)), accel.join(" ")).unwrap();
            list.push_str(&format!("{}.txt\n", name));
            dts.push_str("0.01\n");
        }
        fs::write(dir.join("GMR_names1.txt"), list).unwrap();
        fs::write(dir.join("GMR_dts.txt"), dts).unwrap();
    }

    fn manifest() -> GroundMotionManifest {
        GroundMotionManifest::from_file_names(&["GMR_names1.txt".into(), "GMR_dts.txt".into()]).unwrap()
    }

    fn ida() -> IdaAnalysis {
        AnalysisOptions::ida(vec![0.5])
            .with_max_runs(8)
            .with_intensity_basis(IntensityBasis::ScaleFactor)
            .plan()
            .unwrap()
            .ida_analysis()
            .unwrap()
    }

    fn dry_run() -> DriverKind {
        DriverKind::DryRun {
            threshold: 0.4,
            drift_per_unit: 5.0,
        }
    }

    #[tokio::test]
    async fn test_reports_keep_manifest_order() {
        let dir = tempfile::tempdir().unwrap();
        let names = ["GM_c", "GM_a", "GM_d", "GM_b", "GM_e"];
        write_records(dir.path(), &names);
        let store = RecordStore::new(dir.path(), manifest());

        let reports = BatchRunner::new(dry_run(), 3).run_ida(&ida(), &store, |_| {}).await.unwrap();

        let order: Vec<&str> = reports.iter().map(|r| r.record.as_str()).collect();
        assert_eq!(order, names);
        for (i, report) in reports.iter().enumerate() {
            assert_eq!(report.index, i);
            assert_eq!(report.status, RecordStatus::Complete);
            assert!(report.capacity.as_ref().unwrap().runs.len() <= 8);
        }
    }

    #[tokio::test]
    async fn test_missing_record_file_fails_only_that_record() {
        let dir = tempfile::tempdir().unwrap();
        write_records(dir.path(), &["GM1", "GM2"]);
        fs::remove_file(dir.path().join("GM2.txt")).unwrap();
        let store = RecordStore::new(dir.path(), manifest());

        let reports = BatchRunner::new(dry_run(), 2).run_ida(&ida(), &store, |_| {}).await.unwrap();
        assert_eq!(reports[0].status, RecordStatus::Complete);
        assert_eq!(reports[1].status, RecordStatus::Failed);
        assert!(reports[1].error.is_some());
    }

    #[tokio::test]
    async fn test_missing_manifest_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path(), manifest());
        assert!(BatchRunner::new(dry_run(), 1).run_ida(&ida(), &store, |_| {}).await.is_err());
    }

    #[tokio::test]
    async fn test_msa_stripes_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_records(&dir.path().join("stripe_2"), &["GM3"]);
        write_records(&dir.path().join("stripe_1"), &["GM1", "GM2"]);
        fs::write(dir.path().join("notes.txt"), "not a stripe").unwrap();

        let dirs = discover_stripes(dir.path()).unwrap();
        assert_eq!(dirs.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(), ["stripe_1", "stripe_2"]);

        let stores = dirs.iter().map(|d| RecordStore::new(&d.dir, manifest())).collect();
        let msa = AnalysisOptions::msa().plan().unwrap().stripe_analysis().unwrap();
        let results = BatchRunner::new(dry_run(), 4).run_msa(&msa, dirs, stores).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].records.len(), 2);
        assert_eq!(results[1].records[0].record, "GM3");
        assert!(results.iter().flat_map(|s| &s.records).all(|r| r.run.as_ref().unwrap().scale == 1.0));
    }

    #[tokio::test]
    async fn test_reports_are_handed_over_before_the_batch_returns() {
        let dir = tempfile::tempdir().unwrap();
        write_records(dir.path(), &["GM1", "GM2", "GM3"]);
        let store = RecordStore::new(dir.path(), manifest());
        let writer = OutputWriter::new(dir.path().join("out")).unwrap();

        let mut written = Vec::new();
        let reports = BatchRunner::new(dry_run(), 2)
            .run_ida(&ida(), &store, |report| {
                let path = writer.write_record(report).unwrap();
                written.push((report.record.clone(), path.exists()));
            })
            .await
            .unwrap();

        assert_eq!(written.len(), reports.len());
        assert!(written.iter().all(|(_, exists)| *exists));
        let mut names: Vec<&str> = written.iter().map(|(name, _)| name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, ["GM1", "GM2", "GM3"]);
        assert!(writer.nltha_dir().join("GM2.json").exists());
    }

    #[tokio::test]
    async fn test_inconsistent_stripe_manifest_aborts_before_any_run() {
        let dir = tempfile::tempdir().unwrap();
        write_records(&dir.path().join("stripe_1"), &["GM1"]);
        write_records(&dir.path().join("stripe_2"), &["GM2", "GM3"]);
        // Two names, one time step
        fs::write(dir.path().join("stripe_2").join("GMR_dts.txt"), "0.01\n").unwrap();

        let dirs = discover_stripes(dir.path()).unwrap();
        let stores: Vec<RecordStore> = dirs.iter().map(|d| RecordStore::new(&d.dir, manifest())).collect();
        let err = read_manifests(&stores).unwrap_err();
        assert!(err.is_configuration());

        let msa = AnalysisOptions::msa().plan().unwrap().stripe_analysis().unwrap();
        let result = BatchRunner::new(dry_run(), 1).run_msa(&msa, dirs, stores).await;
        assert!(matches!(result, Err(BatchError::Config(e)) if e.is_configuration()));
    }

    #[test]
    fn test_no_stripes_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_stripes(dir.path()).unwrap_err().is_configuration());
    }
}
