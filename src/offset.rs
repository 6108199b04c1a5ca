//! Binlog 위치 정보 (검색 결과 및 재시작 지점)
//!
//! Binlog 파일명 + 위치로 정확한 재시작 지점을 표현합니다.
//! 예: "mysql-bin.000003" 파일의 4097 바이트 위치

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binlog 파일 위치 정보
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinlogPosition {
    /// 바이너리 로그 파일명 (e.g., "mysql-bin.000001")
    pub filename: String,
    /// 바이트 위치
    pub position: u64,
}

impl BinlogPosition {
    pub fn new(filename: String, position: u64) -> Self {
        BinlogPosition { filename, position }
    }

    /// 파일의 첫 이벤트 위치 (4 바이트 매직 넘버 직후)
    pub fn start_of(filename: String) -> Self {
        BinlogPosition::new(filename, 4)
    }

    /// 파일명에서 시퀀스 번호 추출
    pub fn file_sequence(&self) -> Option<u64> {
        self.filename
            .rsplit('.')
            .next()
            .and_then(|s| s.parse().ok())
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.position)
    }
}

/// 찾은 GTID의 위치
///
/// 항상 `position <= commit_position <= resume_position`.
/// 다음 GTID를 보지 못하고 스캔이 끝나면 `resume_position == commit_position`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GtidPosition {
    /// binlog 파일 (로컬 검색은 경로, 원격 검색은 파일명)
    pub binlog_file: String,
    /// 트랜잭션 시작 위치 (GTID 이벤트 시작)
    #[serde(rename = "start_position")]
    pub position: u32,
    /// 커밋 위치 (XID/COMMIT 이벤트 끝)
    pub commit_position: u32,
    /// CDC 재시작 위치 (다음 GTID 이벤트 끝, 없으면 커밋 위치)
    pub resume_position: u32,
    /// 커밋 이벤트 타임스탬프 (초 단위)
    pub timestamp: u32,
    /// "uuid:gno"
    pub gtid: String,
    pub server_uuid: String,
    pub gno: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub database: String,
    /// 재시작 위치를 결정한 다음 GTID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_gtid: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl GtidPosition {
    pub fn timestamp_readable(&self) -> String {
        Utc.timestamp_opt(self.timestamp as i64, 0)
            .single()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default()
    }

    /// 재시작 지점
    pub fn resume_at(&self) -> BinlogPosition {
        BinlogPosition::new(self.binlog_file.clone(), self.resume_position as u64)
    }

    /// 헤더 + 한 줄의 CSV
    pub fn to_csv(&self) -> String {
        let row = [
            self.binlog_file.clone(),
            self.position.to_string(),
            self.gtid.clone(),
            self.timestamp.to_string(),
            self.timestamp_readable(),
        ];
        let row: Vec<String> = row.iter().map(|field| escape_csv_field(field)).collect();
        format!("{}\n{}\n", CSV_HEADER.join(","), row.join(","))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "total": 1,
            "positions": [self],
        })
    }
}

const CSV_HEADER: [&str; 5] = [
    "binlog_file",
    "position",
    "gtid",
    "timestamp",
    "timestamp_readable",
];

fn escape_csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

impl fmt::Display for GtidPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Binlog File: {}", self.binlog_file)?;
        writeln!(f, "GTID: {}", self.gtid)?;
        writeln!(f, "Start Position (GTID):  {}", self.position)?;
        writeln!(f, "Commit Position (Xid):  {}", self.commit_position)?;
        writeln!(f, "Resume Position:        {}", self.resume_position)?;
        if let Some(next) = &self.next_gtid {
            writeln!(f, "Next GTID:              {}", next)?;
        }
        write!(f, "Timestamp: {}", self.timestamp_readable())?;
        if !self.database.is_empty() {
            write!(f, "\nDatabase: {}", self.database)?;
        }
        Ok(())
    }
}
