//! 로컬 binlog 파일 검색
//!
//! 파일마다 스캔 작업을 하나씩 띄우고 세마포어로 동시 실행 수를 제한합니다.
//! 어느 작업이든 결과를 찾으면 취소 플래그를 세우고, 아직 시작하지 않은 작업은
//! 플래그를 보고 스캔 없이 끝납니다. 이미 실행 중인 스캔은 끝까지 진행됩니다.
//!
//! 작업 간 공유 상태는 결과/에러 목록뿐이며 작업은 추가만 하고,
//! 모든 작업이 끝난 뒤 코디네이터가 한 번 비웁니다.

use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::gtid::GtidSet;
use crate::offset::GtidPosition;
use crate::remote::RemoteSearcher;
use crate::selector::FileSelector;
use crate::source::{BinlogFileOpener, EventSourceFactory};
use crate::tracker::{ScanFilter, ScanOutcome, TransactionTracker};
use parking_lot::Mutex;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// 파일 하나의 스캔 실패
#[derive(Debug)]
pub struct FileError {
    pub path: PathBuf,
    pub error: SearchError,
}

/// 병렬 검색 결과
#[derive(Debug)]
pub struct SearchReport {
    pub position: Option<GtidPosition>,
    pub errors: Vec<FileError>,
    pub total_files: usize,
    /// 취소되지 않고 실제로 스캔을 시작한 파일 수
    pub scanned_files: usize,
    pub duration: Duration,
}

/// 로컬 binlog 검색기
pub struct FileSearcher {
    factory: Arc<dyn EventSourceFactory>,
    filter: ScanFilter,
    parallel: usize,
}

impl FileSearcher {
    pub fn new(filter: ScanFilter, parallel: usize) -> Self {
        Self::with_factory(Arc::new(BinlogFileOpener), filter, parallel)
    }

    pub fn with_factory(
        factory: Arc<dyn EventSourceFactory>,
        filter: ScanFilter,
        parallel: usize,
    ) -> Self {
        FileSearcher {
            factory,
            filter,
            parallel: parallel.max(1),
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(config.scan_filter(), config.parallel)
    }

    /// 디렉토리에서 패턴(`*`, `?`)에 맞는 binlog 파일 목록 (`.index` 제외, 정렬)
    pub fn list_binlog_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
        let matcher = glob_to_regex(pattern)?;

        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| {
            SearchError::IoError(format!("Failed to read directory {}: {}", dir.display(), e))
        })? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(".index") || !matcher.is_match(name) || !path.is_file() {
                continue;
            }
            files.push(path);
        }

        files.sort();
        debug!("Found {} binlog files in {}", files.len(), dir.display());
        Ok(files)
    }

    /// 시작 파일(파일명 또는 경로 끝부분 일치)부터의 목록
    pub fn files_from(files: Vec<PathBuf>, start_file: &str) -> Result<Vec<PathBuf>> {
        let start = files
            .iter()
            .position(|path| {
                path.file_name().and_then(|n| n.to_str()) == Some(start_file)
                    || path.to_string_lossy().ends_with(start_file)
            })
            .ok_or_else(|| SearchError::StartFileNotFound(start_file.to_string()))?;

        Ok(files.into_iter().skip(start).collect())
    }

    /// 헤더 기반 시작 파일 선택
    pub async fn find_start_file(&self, files: &[PathBuf], target: &GtidSet) -> Result<PathBuf> {
        let selector = FileSelector::new(self.factory.clone());
        let files = files.to_vec();
        let target = target.clone();
        tokio::task::spawn_blocking(move || selector.find_start_file(&files, &target)).await?
    }

    /// 파일 하나 스캔 (블로킹 I/O)
    pub fn scan_file(&self, path: &Path, target: &GtidSet) -> Result<ScanOutcome> {
        scan_file(self.factory.as_ref(), path, target.clone(), self.filter.clone())
    }

    pub async fn search(&self, files: &[PathBuf], target: &GtidSet) -> Result<Option<GtidPosition>> {
        Ok(self.search_report(files, target).await?.position)
    }

    /// 모든 파일을 병렬로 스캔하고 GNO가 가장 큰 결과를 선택
    pub async fn search_report(&self, files: &[PathBuf], target: &GtidSet) -> Result<SearchReport> {
        let started = Instant::now();
        let total_files = files.len();
        info!(
            "Searching {} files for {} (database: {}, parallel: {})",
            total_files,
            target,
            self.filter.database.as_deref().unwrap_or("*"),
            self.parallel
        );

        let semaphore = Arc::new(Semaphore::new(self.parallel));
        let cancelled = Arc::new(AtomicBool::new(false));
        let scanned = Arc::new(AtomicUsize::new(0));
        let found: Arc<Mutex<Vec<GtidPosition>>> = Arc::new(Mutex::new(Vec::new()));
        let errors: Arc<Mutex<Vec<FileError>>> = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::with_capacity(total_files);
        for (idx, path) in files.iter().cloned().enumerate() {
            let semaphore = semaphore.clone();
            let cancelled = cancelled.clone();
            let scanned = scanned.clone();
            let found = found.clone();
            let errors = errors.clone();
            let factory = self.factory.clone();
            let target = target.clone();
            let filter = self.filter.clone();

            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if cancelled.load(Ordering::Acquire) {
                    debug!("Skipping {}: match already found", path.display());
                    return;
                }

                scanned.fetch_add(1, Ordering::Relaxed);
                debug!("Scanning [{}/{}]: {}", idx + 1, total_files, path.display());

                let scan_path = path.clone();
                let result = tokio::task::spawn_blocking(move || {
                    scan_file(factory.as_ref(), &scan_path, target, filter)
                })
                .await
                .map_err(SearchError::from)
                .and_then(|result| result);

                match result {
                    Ok(outcome) => {
                        if let Some(position) = outcome.position {
                            debug!("Match in {}: {}", path.display(), position.gtid);
                            found.lock().push(position);
                            cancelled.store(true, Ordering::Release);
                        }
                    }
                    Err(error) => {
                        warn!("Error scanning {}: {}", path.display(), error);
                        errors.lock().push(FileError { path, error });
                    }
                }
            }));
        }

        for task in tasks {
            task.await?;
        }

        let found = std::mem::take(&mut *found.lock());
        let errors = std::mem::take(&mut *errors.lock());
        let position = select_best(found);

        let report = SearchReport {
            position,
            errors,
            total_files,
            scanned_files: scanned.load(Ordering::Relaxed),
            duration: started.elapsed(),
        };

        info!(
            "Search finished in {:.2?}: {} of {} files scanned, {} errors, {}",
            report.duration,
            report.scanned_files,
            report.total_files,
            report.errors.len(),
            match &report.position {
                Some(position) => format!("found {}", position.gtid),
                None => "not found".to_string(),
            }
        );

        Ok(report)
    }
}

fn scan_file(
    factory: &dyn EventSourceFactory,
    path: &Path,
    target: GtidSet,
    filter: ScanFilter,
) -> Result<ScanOutcome> {
    let mut source = factory.open(path)?;
    let tracker = TransactionTracker::new(target, filter, path.display().to_string());
    let outcome = tracker.scan(&mut source)?;
    debug!(
        "{}: {} events, stop: {:?}",
        path.display(),
        outcome.events,
        outcome.stopped
    );
    Ok(outcome)
}

/// GNO가 가장 큰 결과 (같으면 앞선 파일)
fn select_best(found: Vec<GtidPosition>) -> Option<GtidPosition> {
    found.into_iter().max_by(|a, b| {
        a.gno
            .cmp(&b.gno)
            .then_with(|| b.binlog_file.cmp(&a.binlog_file))
    })
}

/// 파일명 glob 패턴을 정규식으로 변환
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() * 2 + 2);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');

    Regex::new(&expr)
        .map_err(|e| SearchError::ConfigError(format!("Invalid file pattern '{}': {}", pattern, e)))
}

/// 설정에 따라 로컬 또는 원격에서 GTID 위치 검색
pub async fn locate(config: &SearchConfig) -> Result<Option<GtidPosition>> {
    config.validate()?;

    let mut target = GtidSet::parse(&config.target_gtid)
        .map_err(|e| SearchError::ConfigError(format!("invalid GTID format: {}", e)))?;

    if config.remote.is_some() {
        return RemoteSearcher::from_config(config)?.search(&target).await;
    }

    let dir = config
        .binlog_dir
        .as_deref()
        .ok_or_else(|| SearchError::ConfigError("BINLOG_DIR is required".to_string()))?;
    let searcher = FileSearcher::from_config(config);

    let files = FileSearcher::list_binlog_files(dir, &config.file_pattern)?;
    if files.is_empty() {
        return Err(SearchError::NoBinlogFiles);
    }

    let start_file = match &config.start_file {
        Some(start_file) => Some(start_file.clone()),
        None => match searcher.find_start_file(&files, &target).await {
            Ok(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            Err(e) => {
                warn!("Start file selection failed, scanning all files: {}", e);
                None
            }
        },
    };

    let files = match start_file {
        Some(start_file) => {
            let files = FileSearcher::files_from(files, &start_file)?;
            info!("Starting from file: {} ({} files to scan)", start_file, files.len());
            files
        }
        None => files,
    };

    let filter_uuid = if config.find_active_master {
        let uuid = target.active_master_uuid()?;
        info!("Active master UUID detected: {}", uuid);
        Some(uuid)
    } else {
        config.filter_uuid.clone()
    };
    if let Some(uuid) = filter_uuid {
        info!("Filtering by UUID: {}", uuid);
        target = target.filter_by_uuid(&uuid)?;
    }

    for info in target.uuid_infos() {
        debug!(
            "UUID {}: transactions {}-{} (total: {})",
            info.uuid, info.min_transaction, info.max_transaction, info.total_count
        );
    }

    let report = searcher.search_report(&files, &target).await?;
    if report.position.is_none() && !report.errors.is_empty() {
        warn!(
            "No match found and {} of {} scanned files failed",
            report.errors.len(),
            report.scanned_files
        );
    }
    Ok(report.position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChecksumAlgorithm;
    use crate::testing::*;

    fn target(text: &str) -> GtidSet {
        GtidSet::parse(text).unwrap()
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    /// 파일 4개, 대상 범위(UUID_A:1-100)는 세 번째 파일에만 있음
    fn spread_factory() -> MockFactory {
        MockFactory::new()
            .with_file(
                "f1",
                vec![gtid_event(UUID_B, 1, 300, 1), xid_event(400, 1)],
            )
            .with_file(
                "f2",
                vec![gtid_event(UUID_A, 150, 300, 2), xid_event(400, 2)],
            )
            .with_file(
                "f3",
                vec![
                    gtid_event(UUID_A, 70, 300, 3),
                    xid_event(400, 3),
                    gtid_event(UUID_A, 90, 500, 3),
                    xid_event(600, 3),
                    gtid_event(UUID_A, 101, 700, 3),
                ],
            )
            .with_file(
                "f4",
                vec![gtid_event(UUID_A, 300, 300, 4), xid_event(400, 4)],
            )
    }

    #[tokio::test]
    async fn test_result_independent_of_parallelism() {
        let files = paths(&["f1", "f2", "f3", "f4"]);
        let target = target(&format!("{}:1-100", UUID_A));
        let factory: Arc<dyn EventSourceFactory> = Arc::new(spread_factory());

        let serial = FileSearcher::with_factory(factory.clone(), ScanFilter::default(), 1)
            .search(&files, &target)
            .await
            .unwrap();
        let parallel = FileSearcher::with_factory(factory, ScanFilter::default(), 8)
            .search(&files, &target)
            .await
            .unwrap();

        let serial = serial.unwrap();
        let parallel = parallel.unwrap();
        assert_eq!(serial.gno, 90);
        assert_eq!(serial.binlog_file, "f3");
        assert_eq!(serial.resume_position, 700);
        assert_eq!(
            (serial.gno, serial.commit_position, serial.resume_position, serial.next_gtid.clone()),
            (parallel.gno, parallel.commit_position, parallel.resume_position, parallel.next_gtid.clone())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_result_independent_of_parallelism_multi_thread() {
        let files = paths(&["f1", "f2", "f3", "f4"]);
        let target = target(&format!("{}:1-100", UUID_A));

        for parallel in [1, 2, 8] {
            let searcher = FileSearcher::with_factory(
                Arc::new(spread_factory()),
                ScanFilter::default(),
                parallel,
            );
            let position = searcher.search(&files, &target).await.unwrap().unwrap();
            assert_eq!(position.gno, 90);
            assert_eq!(position.next_gtid, Some(format!("{}:101", UUID_A)));
        }
    }

    #[tokio::test]
    async fn test_cancellation_skips_pending_files() {
        let factory = Arc::new(
            MockFactory::new()
                .with_file("a", vec![gtid_event(UUID_A, 5, 300, 1), xid_event(400, 1)])
                .with_file("b", vec![gtid_event(UUID_A, 6, 300, 1), xid_event(400, 1)])
                .with_file("c", vec![gtid_event(UUID_A, 7, 300, 1), xid_event(400, 1)]),
        );
        let searcher = FileSearcher::with_factory(factory.clone(), ScanFilter::default(), 1);

        let report = searcher
            .search_report(&paths(&["a", "b", "c"]), &target(&format!("{}:1-100", UUID_A)))
            .await
            .unwrap();

        assert_eq!(report.position.unwrap().gno, 5);
        assert_eq!(report.total_files, 3);
        assert_eq!(report.scanned_files, 1);
        assert_eq!(factory.opened(), paths(&["a"]));
    }

    #[tokio::test]
    async fn test_highest_gno_wins_over_first_finished() {
        let factory = Arc::new(
            MockFactory::new()
                .with_file("a", vec![gtid_event(UUID_A, 5, 300, 1), xid_event(400, 1)])
                .with_file("b", vec![gtid_event(UUID_A, 60, 300, 1), xid_event(400, 1)])
                .with_file("c", vec![gtid_event(UUID_A, 7, 300, 1), xid_event(400, 1)]),
        );
        let searcher = FileSearcher::with_factory(factory, ScanFilter::default(), 8);

        let report = searcher
            .search_report(&paths(&["a", "b", "c"]), &target(&format!("{}:1-100", UUID_A)))
            .await
            .unwrap();

        assert_eq!(report.scanned_files, 3);
        assert_eq!(report.position.unwrap().gno, 60);
    }

    #[tokio::test]
    async fn test_file_errors_are_isolated() {
        let factory = Arc::new(
            MockFactory::new()
                .with_broken_file("bad", "disk error")
                .with_file("good", vec![gtid_event(UUID_A, 5, 300, 1), xid_event(400, 1)]),
        );
        let searcher = FileSearcher::with_factory(factory, ScanFilter::default(), 4);

        let report = searcher
            .search_report(
                &paths(&["bad", "missing", "good"]),
                &target(&format!("{}:1-100", UUID_A)),
            )
            .await
            .unwrap();

        assert_eq!(report.position.unwrap().binlog_file, "good");
        assert_eq!(report.errors.len(), 2);
        assert!(report
            .errors
            .iter()
            .any(|e| e.path == Path::new("bad") && matches!(e.error, SearchError::IoError(_))));
    }

    #[tokio::test]
    async fn test_not_found_is_not_an_error() {
        let searcher =
            FileSearcher::with_factory(Arc::new(spread_factory()), ScanFilter::default(), 2);
        let result = searcher
            .search(&paths(&["f1", "f2"]), &target(&format!("{}:1-100", UUID_A)))
            .await
            .unwrap();
        assert!(result.is_none());

        let empty = searcher.search(&[], &target(&format!("{}:1", UUID_A))).await.unwrap();
        assert!(empty.is_none());
    }

    #[test]
    fn test_select_best_tie_prefers_earlier_file() {
        let mut a = gtid_position("mysql-bin.000001", 10);
        let b = gtid_position("mysql-bin.000002", 10);
        a.commit_position = 1;
        let best = select_best(vec![b, a]).unwrap();
        assert_eq!(best.binlog_file, "mysql-bin.000001");
        assert!(select_best(Vec::new()).is_none());
    }

    fn gtid_position(file: &str, gno: u64) -> GtidPosition {
        GtidPosition {
            binlog_file: file.to_string(),
            position: 0,
            commit_position: 0,
            resume_position: 0,
            timestamp: 0,
            gtid: format!("{}:{}", UUID_A, gno),
            server_uuid: UUID_A.to_string(),
            gno,
            database: String::new(),
            next_gtid: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_list_binlog_files() {
        let dir = TempDir::new();
        for name in [
            "mysql-bin.000002",
            "mysql-bin.000001",
            "mysql-bin.index",
            "relay-bin.000001",
        ] {
            dir.write(name, b"");
        }

        let files = FileSearcher::list_binlog_files(dir.path(), "mysql-bin.*").unwrap();
        assert_eq!(
            files,
            vec![
                dir.path().join("mysql-bin.000001"),
                dir.path().join("mysql-bin.000002"),
            ]
        );

        let files = FileSearcher::list_binlog_files(dir.path(), "*-bin.00000?").unwrap();
        assert_eq!(files.len(), 3);

        // '.'은 정규식 메타문자가 아니라 문자 그대로
        let files = FileSearcher::list_binlog_files(dir.path(), "mysql-bin?000001").unwrap();
        assert_eq!(files.len(), 1);
        assert!(FileSearcher::list_binlog_files(dir.path(), "mysql.bin.*")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_files_from() {
        let files = paths(&["/data/mysql-bin.000001", "/data/mysql-bin.000002", "/data/mysql-bin.000003"]);

        let from = FileSearcher::files_from(files.clone(), "mysql-bin.000002").unwrap();
        assert_eq!(from, paths(&["/data/mysql-bin.000002", "/data/mysql-bin.000003"]));

        let from = FileSearcher::files_from(files.clone(), "data/mysql-bin.000003").unwrap();
        assert_eq!(from, paths(&["/data/mysql-bin.000003"]));

        assert!(matches!(
            FileSearcher::files_from(files, "mysql-bin.000009"),
            Err(SearchError::StartFileNotFound(_))
        ));
    }

    fn write_binlog(dir: &TempDir, name: &str, previous: &str, gnos: &[u64]) -> PathBuf {
        let mut writer = BinlogWriter::new(ChecksumAlgorithm::Crc32);
        writer.format_description(1_700_000_000);
        writer.previous_gtids(previous, 1_700_000_000);
        for gno in gnos {
            writer.query("shop", "BEGIN", 1_700_000_000);
            writer.gtid(UUID_A, *gno, 1_700_000_000 + *gno as u32);
            writer.xid(*gno, 1_700_000_000 + *gno as u32);
        }
        dir.write(name, &writer.into_bytes())
    }

    #[tokio::test]
    async fn test_locate_in_directory() {
        let dir = TempDir::new();
        write_binlog(&dir, "mysql-bin.000001", "", &[1, 2, 3]);
        let second = write_binlog(&dir, "mysql-bin.000002", &format!("{}:1-3", UUID_A), &[4, 5, 6]);
        write_binlog(&dir, "mysql-bin.000003", &format!("{}:1-6", UUID_A), &[7, 8]);
        dir.write("mysql-bin.index", b"mysql-bin.000001\n");

        let config = SearchConfig {
            binlog_dir: Some(dir.path().to_path_buf()),
            target_gtid: format!("{}:4-5", UUID_A),
            parallel: 2,
            ..Default::default()
        };

        let position = locate(&config).await.unwrap().unwrap();
        assert_eq!(position.binlog_file, second.display().to_string());
        assert_eq!(position.gno, 5);
        assert_eq!(position.database, "shop");
        assert_eq!(position.next_gtid, Some(format!("{}:6", UUID_A)));
        assert!(position.position < position.commit_position);
        assert!(position.commit_position < position.resume_position);
    }

    #[tokio::test]
    async fn test_locate_with_start_file_and_uuid_filter() {
        let dir = TempDir::new();
        write_binlog(&dir, "mysql-bin.000001", "", &[1, 2]);
        write_binlog(&dir, "mysql-bin.000002", &format!("{}:1-2", UUID_A), &[3, 4]);

        let config = SearchConfig {
            binlog_dir: Some(dir.path().to_path_buf()),
            target_gtid: format!("{}:1-2,{}:1-900", UUID_A, UUID_B),
            start_file: Some("mysql-bin.000001".to_string()),
            filter_uuid: Some(UUID_A.to_uppercase()),
            ..Default::default()
        };
        let position = locate(&config).await.unwrap().unwrap();
        assert_eq!(position.gno, 2);

        let missing = SearchConfig {
            start_file: Some("mysql-bin.000042".to_string()),
            ..config
        };
        assert!(matches!(
            locate(&missing).await,
            Err(SearchError::StartFileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_locate_active_master() {
        let dir = TempDir::new();
        write_binlog(&dir, "mysql-bin.000001", "", &[10, 11]);

        let config = SearchConfig {
            binlog_dir: Some(dir.path().to_path_buf()),
            // UUID_A의 최대 트랜잭션이 더 큼 -> UUID_A만 검색
            target_gtid: format!("{}:10-500,{}:1-20", UUID_A, UUID_B),
            find_active_master: true,
            ..Default::default()
        };
        let position = locate(&config).await.unwrap().unwrap();
        assert_eq!(position.server_uuid, UUID_A);
        assert_eq!(position.gno, 11);
    }

    #[tokio::test]
    async fn test_locate_empty_directory() {
        let dir = TempDir::new();
        let config = SearchConfig {
            binlog_dir: Some(dir.path().to_path_buf()),
            target_gtid: format!("{}:1", UUID_A),
            ..Default::default()
        };
        assert!(matches!(locate(&config).await, Err(SearchError::NoBinlogFiles)));
    }
}
