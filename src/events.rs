//! MySQL Binlog 이벤트 타입 및 데이터 구조 정의
//!
//! 위치 검색에 필요한 이벤트(트랜잭션 경계, 스키마, 파일 헤더)만 디코딩하고
//! 나머지는 `Unknown`으로 통과시킵니다.

use serde::{Deserialize, Serialize};

/// MySQL Binlog 이벤트 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventType {
    /// 알 수 없는 이벤트
    Unknown = 0,
    /// 쿼리 이벤트 (DDL, BEGIN/COMMIT)
    QueryEvent = 2,
    /// 로테이션 이벤트 (새 binlog 파일)
    RotateEvent = 4,
    /// 포맷 설명 이벤트 (파일 헤더, 체크섬 알고리즘 포함)
    FormatDescriptionEvent = 15,
    /// XID 이벤트 (InnoDB 트랜잭션 커밋)
    XidEvent = 16,
    /// GTID 이벤트 (트랜잭션 시작)
    GtidEvent = 33,
    /// 이전 GTID 집합 이벤트 (파일 헤더)
    PreviousGtidsEvent = 35,
    /// 트랜잭션 페이로드 이벤트 (binlog_transaction_compression, 내부 이벤트는 압축됨)
    TransactionPayloadEvent = 40,
}

impl EventType {
    pub fn from_u8(val: u8) -> Self {
        match val {
            2 => EventType::QueryEvent,
            4 => EventType::RotateEvent,
            15 => EventType::FormatDescriptionEvent,
            16 => EventType::XidEvent,
            33 => EventType::GtidEvent,
            35 => EventType::PreviousGtidsEvent,
            40 => EventType::TransactionPayloadEvent,
            _ => EventType::Unknown,
        }
    }
}

/// Binlog 이벤트 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventHeader {
    /// 이벤트 타임스탬프 (초 단위)
    pub timestamp: u32,
    /// 이벤트 타입
    pub event_type: EventType,
    /// MySQL 서버 ID
    pub server_id: u32,
    /// 이벤트 길이 (헤더 + 본문 + 체크섬, 바이트)
    pub event_length: u32,
    /// 다음 이벤트 위치 (= 이 이벤트의 끝 오프셋)
    pub next_pos: u32,
    /// 이벤트 플래그
    pub flags: u16,
}

impl EventHeader {
    /// 이벤트 시작 오프셋
    pub fn start_pos(&self) -> u32 {
        self.next_pos.saturating_sub(self.event_length)
    }
}

/// GTID 이벤트 데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GtidEventData {
    /// 서버 UUID (소문자 하이픈 형식)
    pub server_uuid: String,
    /// 트랜잭션 번호 (GNO)
    pub gno: u64,
}

impl GtidEventData {
    /// "uuid:gno" 형식
    pub fn gtid(&self) -> String {
        format!("{}:{}", self.server_uuid, self.gno)
    }
}

/// 쿼리 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEventData {
    /// 스레드 ID
    pub thread_id: u32,
    /// 실행 시간 (초)
    pub exec_time: u32,
    /// 데이터베이스명 (스키마)
    pub database: String,
    /// 쿼리 문자열
    pub query: String,
}

impl QueryEventData {
    /// 트랜잭션 커밋을 나타내는 쿼리인지 (비-트랜잭션 엔진의 `COMMIT`)
    pub fn is_commit(&self) -> bool {
        self.query == "COMMIT" || self.query == "commit"
    }
}

/// 회전 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateEventData {
    /// 새 바이너리 로그 파일명
    pub next_binlog_name: String,
    /// 새 파일의 시작 위치
    pub position: u64,
}

/// 포맷 설명 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatDescriptionData {
    pub binlog_version: u16,
    pub server_version: String,
    /// 이후 이벤트들이 CRC32 체크섬을 가지는지
    pub checksum: ChecksumAlgorithm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    None,
    Crc32,
}

/// 검색에 필요한 Binlog 이벤트 본문
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BinlogEventData {
    FormatDescription(FormatDescriptionData),
    Query(QueryEventData),
    Xid(u64),
    Rotate(RotateEventData),
    Gtid(GtidEventData),
    /// 이전 GTID 집합 (텍스트 형식)
    PreviousGtids(String),
    Unknown,
}

/// 완성된 Binlog 이벤트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinlogEvent {
    /// 이벤트 헤더
    pub header: EventHeader,
    /// 이벤트 데이터
    pub data: BinlogEventData,
}
