//! 검색 설정
//!
//! 모든 설정은 환경 변수에서 읽습니다. 검증(`validate`)은 스캔을 시작하기 전에
//! 끝나며, 설정 에러가 검색 로직까지 전달되지 않습니다.

use crate::connection::ConnectionConfig;
use crate::error::{Result, SearchError};
use crate::tracker::ScanFilter;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// 결과 출력 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Console,
    Json,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(OutputFormat::Console),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(SearchError::ConfigError(format!(
                "invalid output format: {} (must be console, csv or json)",
                other
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Console => write!(f, "console"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

/// 검색 설정
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// 로컬 binlog 디렉토리 (원격 검색과 배타적)
    pub binlog_dir: Option<PathBuf>,
    /// 찾을 GTID 집합 문자열
    pub target_gtid: String,
    pub file_pattern: String,
    /// 이 파일부터 검색 (없으면 헤더 기반 자동 선택)
    pub start_file: Option<String>,
    pub parallel: usize,
    pub verbose: bool,
    pub output_format: OutputFormat,
    /// json/csv 결과 파일 (없거나 "-"이면 stdout)
    pub output_file: Option<PathBuf>,
    pub filter_uuid: Option<String>,
    pub find_active_master: bool,
    pub filter_database: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// 원격 서버 (로컬 디렉토리와 배타적)
    pub remote: Option<ConnectionConfig>,
    /// 복제 스트림에서 이 시간 동안 이벤트가 없으면 검색 종료
    pub idle_timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            binlog_dir: None,
            target_gtid: String::new(),
            file_pattern: "mysql-bin.*".to_string(),
            start_file: None,
            parallel: 4,
            verbose: false,
            output_format: OutputFormat::Console,
            output_file: None,
            filter_uuid: None,
            find_active_master: false,
            filter_database: None,
            start_time: None,
            end_time: None,
            remote: None,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

impl SearchConfig {
    /// 프로세스 환경 변수에서 읽기
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 임의의 키-값 조회 함수에서 읽기
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = SearchConfig::default();

        let remote = match get("DB_HOST") {
            Some(hostname) => {
                let defaults = ConnectionConfig::default();
                Some(ConnectionConfig {
                    hostname,
                    port: parse_number(get("DB_PORT"), "DB_PORT", defaults.port)?,
                    username: get("DB_USER").unwrap_or_default(),
                    password: lookup("DB_PASSWORD").unwrap_or_default(),
                    server_id: parse_number(get("SERVER_ID"), "SERVER_ID", defaults.server_id)?,
                    ..defaults
                })
            }
            None => None,
        };

        Ok(SearchConfig {
            binlog_dir: get("BINLOG_DIR").map(PathBuf::from),
            target_gtid: get("TARGET_GTID").unwrap_or_default(),
            file_pattern: get("FILE_PATTERN").unwrap_or(defaults.file_pattern),
            start_file: get("START_FILE"),
            parallel: parse_number(get("PARALLEL"), "PARALLEL", defaults.parallel)?,
            verbose: parse_flag(get("VERBOSE")),
            output_format: match get("OUTPUT_FORMAT") {
                Some(format) => format.parse()?,
                None => defaults.output_format,
            },
            output_file: get("OUTPUT_FILE").filter(|v| v != "-").map(PathBuf::from),
            filter_uuid: get("FILTER_UUID"),
            find_active_master: parse_flag(get("FIND_ACTIVE_MASTER")),
            filter_database: get("FILTER_DATABASE"),
            start_time: get("START_TIME").map(|v| parse_time(&v)).transpose()?,
            end_time: get("END_TIME").map(|v| parse_time(&v)).transpose()?,
            remote,
            idle_timeout: Duration::from_secs(parse_number(
                get("IDLE_TIMEOUT_SECS"),
                "IDLE_TIMEOUT_SECS",
                defaults.idle_timeout.as_secs(),
            )?),
        })
    }

    /// 검색 시작 전 설정 검증
    pub fn validate(&self) -> Result<()> {
        match (&self.binlog_dir, &self.remote) {
            (None, None) => {
                return Err(SearchError::ConfigError(
                    "either binlog directory (BINLOG_DIR) or mysql host (DB_HOST) is required"
                        .to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(SearchError::ConfigError(
                    "cannot specify both BINLOG_DIR and DB_HOST".to_string(),
                ))
            }
            _ => {}
        }

        if let Some(remote) = &self.remote {
            if remote.username.is_empty() || remote.password.is_empty() {
                return Err(SearchError::ConfigError(
                    "user and password are required when using DB_HOST".to_string(),
                ));
            }
        }

        if self.target_gtid.trim().is_empty() {
            return Err(SearchError::ConfigError("TARGET_GTID is required".to_string()));
        }

        if let Some(dir) = &self.binlog_dir {
            if !dir.is_dir() {
                return Err(SearchError::ConfigError(format!(
                    "binlog directory does not exist: {}",
                    dir.display()
                )));
            }
        }

        if self.find_active_master && self.remote.is_some() {
            return Err(SearchError::ConfigError(
                "FIND_ACTIVE_MASTER is currently supported only for local binlog files".to_string(),
            ));
        }

        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if end < start {
                return Err(SearchError::ConfigError(format!(
                    "END_TIME ({}) is before START_TIME ({})",
                    end.to_rfc3339(),
                    start.to_rfc3339()
                )));
            }
        }

        Ok(())
    }

    /// 트래커에 넘길 필터 (시각은 binlog 타임스탬프 단위로 변환)
    pub fn scan_filter(&self) -> ScanFilter {
        ScanFilter {
            database: self.filter_database.clone(),
            start_time: self.start_time.map(to_binlog_timestamp),
            end_time: self.end_time.map(to_binlog_timestamp),
        }
    }
}

fn to_binlog_timestamp(time: DateTime<Utc>) -> u32 {
    time.timestamp().clamp(0, u32::MAX as i64) as u32
}

fn parse_flag(value: Option<String>) -> bool {
    matches!(
        value.map(|v| v.to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

fn parse_number<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(v) => v
            .parse()
            .map_err(|_| SearchError::ConfigError(format!("{} must be a number, got '{}'", key, v))),
        None => Ok(default),
    }
}

/// 시각 문자열 파싱 (RFC 3339, `2006-01-02 15:04:05`, `2006-01-02`; 시간대 없으면 UTC)
pub fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.with_timezone(&Utc));
    }
    if let Ok(time) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(time.and_utc());
    }
    if let Some(time) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(time.and_utc());
    }

    Err(SearchError::ConfigError(format!(
        "invalid time format '{}', use: 2006-01-02 15:04:05 or RFC3339",
        value
    )))
}
