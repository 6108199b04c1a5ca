//! 테스트 전용 도구: binlog 바이트 생성기, 메모리 이벤트 소스, 임시 디렉토리

use crate::binlog::{BinlogDecoder, BinlogParser, BINLOG_MAGIC, EVENT_HEADER_SIZE};
use crate::error::{Result, SearchError};
use crate::events::*;
use crate::gtid::GtidSet;
use crate::source::{EventSource, EventSourceFactory};
use byteorder::{LittleEndian, WriteBytesExt};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const UUID_A: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";
pub const UUID_B: &str = "550e8400-e29b-41d4-a716-446655440000";

/// 실제 binlog 형식의 바이트를 만드는 작성기
pub struct BinlogWriter {
    bytes: Vec<u8>,
    events: Vec<(usize, usize)>,
    checksum: ChecksumAlgorithm,
}

impl BinlogWriter {
    pub fn new(checksum: ChecksumAlgorithm) -> Self {
        BinlogWriter {
            bytes: BINLOG_MAGIC.to_vec(),
            events: Vec::new(),
            checksum,
        }
    }

    /// 다음 이벤트가 기록될 오프셋
    pub fn position(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn event(&mut self, event_type: u8, timestamp: u32, payload: &[u8]) -> u32 {
        let crc_len = match self.checksum {
            ChecksumAlgorithm::Crc32 => 4,
            ChecksumAlgorithm::None => 0,
        };
        let start = self.bytes.len();
        let event_length = (EVENT_HEADER_SIZE + payload.len() + crc_len) as u32;
        let next_pos = start as u32 + event_length;

        let mut event = Vec::with_capacity(event_length as usize);
        event.write_u32::<LittleEndian>(timestamp).unwrap();
        event.write_u8(event_type).unwrap();
        event.write_u32::<LittleEndian>(1).unwrap();
        event.write_u32::<LittleEndian>(event_length).unwrap();
        event.write_u32::<LittleEndian>(next_pos).unwrap();
        event.write_u16::<LittleEndian>(0).unwrap();
        event.extend_from_slice(payload);
        if crc_len > 0 {
            let crc = crc32fast::hash(&event);
            event.write_u32::<LittleEndian>(crc).unwrap();
        }

        self.bytes.extend_from_slice(&event);
        self.events.push((start, self.bytes.len()));
        next_pos
    }

    pub fn format_description(&mut self, timestamp: u32) -> u32 {
        let mut payload = Vec::new();
        payload.write_u16::<LittleEndian>(4).unwrap();
        let mut version = [0u8; 50];
        version[..10].copy_from_slice(b"8.0.36-log");
        payload.extend_from_slice(&version);
        payload.write_u32::<LittleEndian>(timestamp).unwrap();
        payload.write_u8(EVENT_HEADER_SIZE as u8).unwrap();
        payload.extend_from_slice(&[0u8; 40]);
        match self.checksum {
            ChecksumAlgorithm::Crc32 => payload.write_u8(1).unwrap(),
            ChecksumAlgorithm::None => {
                payload.write_u8(0).unwrap();
                payload.extend_from_slice(&[0u8; 4]);
            }
        }
        self.event(15, timestamp, &payload)
    }

    pub fn previous_gtids(&mut self, gtid_set: &str, timestamp: u32) -> u32 {
        let set = GtidSet::parse(gtid_set).unwrap();
        let mut payload = Vec::new();
        payload.write_u64::<LittleEndian>(set.sets.len() as u64).unwrap();
        for (uuid, uuid_set) in &set.sets {
            payload.extend_from_slice(Uuid::parse_str(uuid).unwrap().as_bytes());
            payload
                .write_u64::<LittleEndian>(uuid_set.ranges.len() as u64)
                .unwrap();
            for range in &uuid_set.ranges {
                payload.write_u64::<LittleEndian>(range.start).unwrap();
                payload.write_u64::<LittleEndian>(range.end + 1).unwrap();
            }
        }
        self.event(35, timestamp, &payload)
    }

    pub fn gtid(&mut self, uuid: &str, gno: u64, timestamp: u32) -> u32 {
        let mut payload = Vec::new();
        payload.write_u8(1).unwrap();
        payload.extend_from_slice(Uuid::parse_str(uuid).unwrap().as_bytes());
        payload.write_u64::<LittleEndian>(gno).unwrap();
        payload.write_u8(2).unwrap();
        payload.write_u64::<LittleEndian>(0).unwrap();
        payload.write_u64::<LittleEndian>(1).unwrap();
        self.event(33, timestamp, &payload)
    }

    pub fn query(&mut self, database: &str, query: &str, timestamp: u32) -> u32 {
        let status = [0u8; 6];
        let mut payload = Vec::new();
        payload.write_u32::<LittleEndian>(10).unwrap();
        payload.write_u32::<LittleEndian>(0).unwrap();
        payload.write_u8(database.len() as u8).unwrap();
        payload.write_u16::<LittleEndian>(0).unwrap();
        payload.write_u16::<LittleEndian>(status.len() as u16).unwrap();
        payload.extend_from_slice(&status);
        payload.extend_from_slice(database.as_bytes());
        payload.write_u8(0).unwrap();
        payload.extend_from_slice(query.as_bytes());
        self.event(2, timestamp, &payload)
    }

    pub fn xid(&mut self, xid: u64, timestamp: u32) -> u32 {
        let mut payload = Vec::new();
        payload.write_u64::<LittleEndian>(xid).unwrap();
        self.event(16, timestamp, &payload)
    }

    /// 압축된 트랜잭션 페이로드 (본문은 그대로 기록)
    pub fn transaction_payload(&mut self, compressed: &[u8], timestamp: u32) -> u32 {
        self.event(40, timestamp, compressed)
    }

    pub fn rotate(&mut self, next_file: &str, timestamp: u32) -> u32 {
        let mut payload = Vec::new();
        payload.write_u64::<LittleEndian>(4).unwrap();
        payload.extend_from_slice(next_file.as_bytes());
        self.event(4, timestamp, &payload)
    }

    /// 이벤트별 원시 바이트 (복제 패킷 본문으로 사용)
    pub fn raw_events(&self) -> Vec<Vec<u8>> {
        self.events
            .iter()
            .map(|(start, end)| self.bytes[*start..*end].to_vec())
            .collect()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn decode_all(&self) -> Result<Vec<BinlogEvent>> {
        BinlogParser::verify_magic(&self.bytes)?;
        let mut decoder = BinlogDecoder::new();
        self.raw_events()
            .iter()
            .map(|raw| decoder.decode(raw))
            .collect()
    }
}

/// 헤더 필드를 직접 지정한 이벤트 생성 (트래커 단위 테스트용)
pub fn event(event_type: EventType, end: u32, size: u32, timestamp: u32, data: BinlogEventData) -> BinlogEvent {
    BinlogEvent {
        header: EventHeader {
            timestamp,
            event_type,
            server_id: 1,
            event_length: size,
            next_pos: end,
            flags: 0,
        },
        data,
    }
}

pub fn gtid_event(uuid: &str, gno: u64, end: u32, timestamp: u32) -> BinlogEvent {
    event(
        EventType::GtidEvent,
        end,
        65,
        timestamp,
        BinlogEventData::Gtid(GtidEventData {
            server_uuid: uuid.to_string(),
            gno,
        }),
    )
}

pub fn xid_event(end: u32, timestamp: u32) -> BinlogEvent {
    event(EventType::XidEvent, end, 31, timestamp, BinlogEventData::Xid(1))
}

pub fn query_event(database: &str, query: &str, end: u32, timestamp: u32) -> BinlogEvent {
    event(
        EventType::QueryEvent,
        end,
        80,
        timestamp,
        BinlogEventData::Query(QueryEventData {
            thread_id: 1,
            exec_time: 0,
            database: database.to_string(),
            query: query.to_string(),
        }),
    )
}

pub fn rotate_event(next_file: &str, end: u32) -> BinlogEvent {
    event(
        EventType::RotateEvent,
        end,
        43,
        0,
        BinlogEventData::Rotate(RotateEventData {
            next_binlog_name: next_file.to_string(),
            position: 4,
        }),
    )
}

pub fn previous_gtids_event(gtid_set: &str) -> BinlogEvent {
    event(
        EventType::PreviousGtidsEvent,
        195,
        71,
        0,
        BinlogEventData::PreviousGtids(gtid_set.to_string()),
    )
}

/// 메모리 이벤트 소스 (선택적으로 마지막에 스트림 에러)
pub struct VecSource {
    events: VecDeque<BinlogEvent>,
    fail_at_end: Option<String>,
}

impl VecSource {
    pub fn new(events: Vec<BinlogEvent>) -> Self {
        VecSource {
            events: events.into(),
            fail_at_end: None,
        }
    }

    pub fn failing(events: Vec<BinlogEvent>, message: &str) -> Self {
        VecSource {
            events: events.into(),
            fail_at_end: Some(message.to_string()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

impl EventSource for VecSource {
    fn next_event(&mut self) -> Result<Option<BinlogEvent>> {
        match self.events.pop_front() {
            Some(event) => Ok(Some(event)),
            None => match self.fail_at_end.take() {
                Some(message) => Err(SearchError::IoError(message)),
                None => Ok(None),
            },
        }
    }
}

/// 경로별 메모리 이벤트를 돌려주는 팩토리 (열린 파일 기록)
#[derive(Default)]
pub struct MockFactory {
    files: HashMap<PathBuf, Vec<BinlogEvent>>,
    broken: HashMap<PathBuf, String>,
    opened: Mutex<Vec<PathBuf>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, events: Vec<BinlogEvent>) -> Self {
        self.files.insert(PathBuf::from(path), events);
        self
    }

    pub fn with_broken_file(mut self, path: &str, message: &str) -> Self {
        self.broken.insert(PathBuf::from(path), message.to_string());
        self
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().clone()
    }
}

impl EventSourceFactory for MockFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn EventSource>> {
        self.opened.lock().push(path.to_path_buf());
        if let Some(message) = self.broken.get(path) {
            return Ok(Box::new(VecSource::failing(Vec::new(), message)));
        }
        let events = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| SearchError::IoError(format!("no such file: {}", path.display())))?;
        Ok(Box::new(VecSource::new(events)))
    }
}

/// 테스트마다 고유한 임시 디렉토리 (Drop 시 삭제)
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("gtid-position-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path).unwrap();
        TempDir { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}
