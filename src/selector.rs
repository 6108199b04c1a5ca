//! 시작 파일 선택기
//!
//! 각 파일 헤더의 PREVIOUS_GTIDS 이벤트만 읽어서 이진 탐색으로
//! 대상 GTID가 처음 나타날 수 있는 파일을 고릅니다.
//!
//! 전제 조건: 정렬된 파일 목록에서 `previous_gtids(file[i]) ⊇ target`은 단조적이어야
//! 합니다 (한 번 참이면 이후 파일도 모두 참). binlog가 연속적이고 purge되지 않았으며
//! GTID 기록이 누적될 때만 성립합니다. GTID purge나 멀티 소스 토폴로지 변경 이후에는
//! 반환된 파일에 대상이 없을 수 있으며, 이 조건은 실행 중에 검사하지 않습니다.

use crate::error::{Result, SearchError};
use crate::events::BinlogEventData;
use crate::gtid::GtidSet;
use crate::source::EventSourceFactory;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct FileSelector {
    factory: Arc<dyn EventSourceFactory>,
}

impl FileSelector {
    pub fn new(factory: Arc<dyn EventSourceFactory>) -> Self {
        FileSelector { factory }
    }

    /// 파일 헤더의 PREVIOUS_GTIDS 집합 (첫 번째 것만 읽고 중단)
    pub fn probe_previous_gtids(&self, path: &Path) -> Result<Option<GtidSet>> {
        let mut source = self.factory.open(path)?;

        while let Some(event) = source.next_event()? {
            if let BinlogEventData::PreviousGtids(text) = &event.data {
                return GtidSet::parse(text).map(Some);
            }
        }

        Ok(None)
    }

    /// `previous_gtids(path) ⊇ target` (알 수 없으면 false)
    fn already_executed(&self, path: &Path, target: &GtidSet) -> bool {
        match self.probe_previous_gtids(path) {
            Ok(Some(previous)) => {
                let covered = previous.contains_set(target);
                debug!(
                    "{}: previous GTIDs {} (covers target: {})",
                    path.display(),
                    previous,
                    covered
                );
                covered
            }
            Ok(None) => {
                warn!("{}: no PREVIOUS_GTIDS event in header", path.display());
                false
            }
            Err(e) => {
                warn!("{}: failed to read header: {}", path.display(), e);
                false
            }
        }
    }

    /// 대상 GTID의 시작이 들어있을 파일
    pub fn find_start_file(&self, files: &[PathBuf], target: &GtidSet) -> Result<PathBuf> {
        let (first, last) = match (files.first(), files.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(SearchError::NoBinlogFiles),
        };

        let idx = files.partition_point(|path| !self.already_executed(path, target));

        let selected = if idx == 0 {
            first
        } else if idx == files.len() {
            last
        } else {
            &files[idx - 1]
        };

        info!(
            "Selected start file {} ({} of {} files)",
            selected.display(),
            idx.max(1),
            files.len()
        );
        Ok(selected.clone())
    }
}
