//! MySQL GTID 위치 검색
//!
//! binlog 파일이나 복제 스트림에서 특정 GTID 트랜잭션의 정확한 위치를 찾고,
//! CDC 소비자가 다시 시작해야 할 위치(resume position)를 계산합니다.
//! 주요 기능:
//! - Binlog 이벤트 디코딩 (파일 및 복제 프로토콜)
//! - 트랜잭션 경계 추적 (시작/커밋/다음 트랜잭션 위치)
//! - 병렬 파일 스캔 및 조기 취소
//! - PREVIOUS_GTIDS 헤더 기반 시작 파일 이진 탐색
//! - 원격 서버 복제 스트림 검색

pub mod auth;
pub mod binlog;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod gtid;
pub mod offset;
pub mod protocol;
pub mod remote;
pub mod searcher;
pub mod selector;
pub mod source;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use config::{OutputFormat, SearchConfig};
pub use error::{Result, SearchError};
pub use events::{BinlogEvent, EventType};
pub use gtid::GtidSet;
pub use offset::GtidPosition;
pub use remote::RemoteSearcher;
pub use searcher::{locate, FileSearcher, SearchReport};
pub use selector::FileSelector;
pub use tracker::{ScanFilter, TransactionTracker};
