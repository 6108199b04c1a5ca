//! GTID 위치 검색 관련 에러 타입

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("MySQL 연결 에러: {0}")]
    ConnectionError(String),

    #[error("Binlog 파싱 에러: {0}")]
    BinlogParseError(String),

    #[error("Binlog 체크섬 불일치: position {position}, expected {expected:#010x}, actual {actual:#010x}")]
    ChecksumMismatch {
        position: u32,
        expected: u32,
        actual: u32,
    },

    #[error("GTID 처리 에러: {0}")]
    GtidError(String),

    #[error("쿼리 실행 에러: {0}")]
    QueryError(String),

    #[error("I/O 에러: {0}")]
    IoError(String),

    #[error("프로토콜 에러: {0}")]
    ProtocolError(String),

    #[error("설정 에러: {0}")]
    ConfigError(String),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("binlog 파일을 찾을 수 없습니다")]
    NoBinlogFiles,

    #[error("시작 파일 '{0}'이(가) binlog 목록에 없습니다")]
    StartFileNotFound(String),

    #[error("스캔 작업 실패: {0}")]
    TaskFailed(String),

    #[error("Timeout 에러")]
    Timeout,
}

impl From<io::Error> for SearchError {
    fn from(err: io::Error) -> Self {
        SearchError::IoError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SearchError {
    fn from(err: tokio::task::JoinError) -> Self {
        SearchError::TaskFailed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
