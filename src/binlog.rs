//! MySQL Binlog 프로토콜 파싱 및 Binlog 파일 리더
//!
//! Binlog 파일의 바이너리 형식을 파싱합니다.
//! 헤더: 4 바이트 매직 넘버 (0xfe 0x62 0x69 0x6e)
//! 각 이벤트:
//!   - Timestamp (4 bytes)
//!   - Type (1 byte)
//!   - Server ID (4 bytes)
//!   - Event Length (4 bytes)
//!   - Next Position (4 bytes)
//!   - Flags (2 bytes)
//!   - Event Data (variable)
//!   - Checksum (4 bytes, CRC32일 때만)

use crate::error::{Result, SearchError};
use crate::events::*;
use crate::gtid::{GtidRange, GtidSet};
use crate::source::EventSource;
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Buf;
use std::fs::File;
use std::io::{BufReader, Cursor, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use uuid::Uuid;

pub const BINLOG_MAGIC: &[u8] = &[0xfe, 0x62, 0x69, 0x6e]; // ".bin" in ASCII
pub const EVENT_HEADER_SIZE: usize = 19;
const CHECKSUM_SIZE: usize = 4;
/// binlog_version(2) + server_version(50) + create_timestamp(4) + header_length(1)
const FDE_FIXED_SIZE: usize = 57;

/// Binlog 이벤트 파서
pub struct BinlogParser;

impl BinlogParser {
    /// Binlog 파일 헤더 검증
    pub fn verify_magic(data: &[u8]) -> Result<()> {
        if data.len() < 4 {
            return Err(SearchError::BinlogParseError(
                "Invalid binlog: too short".to_string(),
            ));
        }

        if data[0..4] == BINLOG_MAGIC[..] {
            Ok(())
        } else {
            Err(SearchError::BinlogParseError(
                "Invalid binlog magic number".to_string(),
            ))
        }
    }

    /// 이벤트 헤더 파싱
    pub fn parse_header(data: &[u8]) -> Result<EventHeader> {
        if data.len() < EVENT_HEADER_SIZE {
            return Err(SearchError::BinlogParseError(
                "Invalid event header: too short".to_string(),
            ));
        }

        let mut cursor = Cursor::new(data);

        let timestamp = cursor.read_u32::<LittleEndian>()?;
        let event_type = cursor.read_u8()?;
        let server_id = cursor.read_u32::<LittleEndian>()?;
        let event_length = cursor.read_u32::<LittleEndian>()?;
        let next_pos = cursor.read_u32::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;

        Ok(EventHeader {
            timestamp,
            event_type: EventType::from_u8(event_type),
            server_id,
            event_length,
            next_pos,
            flags,
        })
    }

    /// FORMAT_DESCRIPTION 이벤트 파싱 (15)
    ///
    /// `data`는 체크섬을 포함한 전체 본문입니다. 5.6.1 이후 서버는 본문 끝에
    /// checksum_alg(1) + checksum(4)를 항상 기록합니다.
    pub fn parse_format_description_event(data: &[u8]) -> Result<FormatDescriptionData> {
        if data.len() < FDE_FIXED_SIZE {
            return Err(SearchError::BinlogParseError(
                "Invalid format description event".to_string(),
            ));
        }

        let mut cursor = Cursor::new(data);
        let binlog_version = cursor.read_u16::<LittleEndian>()?;

        let mut version_bytes = [0u8; 50];
        cursor.read_exact(&mut version_bytes)?;
        let server_version = String::from_utf8_lossy(&version_bytes)
            .trim_end_matches('\0')
            .to_string();

        let checksum = if mysql_version_has_checksum(&server_version)
            && data.len() >= FDE_FIXED_SIZE + 1 + CHECKSUM_SIZE
        {
            match data[data.len() - CHECKSUM_SIZE - 1] {
                1 => ChecksumAlgorithm::Crc32,
                _ => ChecksumAlgorithm::None,
            }
        } else {
            ChecksumAlgorithm::None
        };

        Ok(FormatDescriptionData {
            binlog_version,
            server_version,
            checksum,
        })
    }

    /// QUERY 이벤트 파싱 (2)
    pub fn parse_query_event(data: &[u8]) -> Result<QueryEventData> {
        if data.len() < 13 {
            return Err(SearchError::BinlogParseError(
                "Invalid query event".to_string(),
            ));
        }

        let mut cursor = Cursor::new(data);

        let thread_id = cursor.read_u32::<LittleEndian>()?;
        let exec_time = cursor.read_u32::<LittleEndian>()?;
        let db_len = cursor.read_u8()? as usize;
        let _error_code = cursor.read_u16::<LittleEndian>()?;
        let status_len = cursor.read_u16::<LittleEndian>()? as usize;

        // Status variables skip
        if cursor.remaining() < status_len + db_len + 1 {
            return Err(SearchError::BinlogParseError(
                "Invalid query event: truncated".to_string(),
            ));
        }
        cursor.advance(status_len);

        let mut db_bytes = vec![0u8; db_len];
        cursor.read_exact(&mut db_bytes)?;
        let database = String::from_utf8_lossy(&db_bytes).to_string();

        // null terminator skip
        cursor.advance(1);

        let query = String::from_utf8_lossy(cursor.chunk()).to_string();

        Ok(QueryEventData {
            thread_id,
            exec_time,
            database,
            query,
        })
    }

    /// XID 이벤트 파싱 (16)
    pub fn parse_xid_event(data: &[u8]) -> Result<u64> {
        if data.len() < 8 {
            return Err(SearchError::BinlogParseError("Invalid XID event".to_string()));
        }
        Ok(Cursor::new(data).read_u64::<LittleEndian>()?)
    }

    /// ROTATE 이벤트 파싱 (4)
    pub fn parse_rotate_event(data: &[u8]) -> Result<RotateEventData> {
        if data.len() < 8 {
            return Err(SearchError::BinlogParseError(
                "Invalid rotate event".to_string(),
            ));
        }

        let mut cursor = Cursor::new(data);

        let position = cursor.read_u64::<LittleEndian>()?;
        let filename = String::from_utf8_lossy(cursor.chunk())
            .trim_end_matches('\0')
            .to_string();

        Ok(RotateEventData {
            next_binlog_name: filename,
            position,
        })
    }

    /// GTID 이벤트 파싱 (33)
    pub fn parse_gtid_event(data: &[u8]) -> Result<GtidEventData> {
        if data.len() < 25 {
            return Err(SearchError::BinlogParseError(
                "Invalid GTID event".to_string(),
            ));
        }

        let mut cursor = Cursor::new(data);

        let _flags = cursor.read_u8()?;
        let mut uuid_bytes = [0u8; 16];
        cursor.read_exact(&mut uuid_bytes)?;
        let gno = cursor.read_u64::<LittleEndian>()?;

        Ok(GtidEventData {
            server_uuid: format_uuid(&uuid_bytes),
            gno,
        })
    }

    /// PREVIOUS_GTIDS 이벤트 파싱 (35)
    ///
    /// n_sids(8), 각 sid마다 uuid(16) + n_intervals(8) + [start(8), end(8) 미포함] 반복
    pub fn parse_previous_gtids_event(data: &[u8]) -> Result<GtidSet> {
        let truncated =
            || SearchError::BinlogParseError("Invalid previous GTIDs event: truncated".to_string());

        let mut cursor = Cursor::new(data);
        let n_sids = cursor.read_u64::<LittleEndian>().map_err(|_| truncated())?;

        let mut gtid_set = GtidSet::new();
        for _ in 0..n_sids {
            let mut uuid_bytes = [0u8; 16];
            cursor.read_exact(&mut uuid_bytes).map_err(|_| truncated())?;
            let uuid = format_uuid(&uuid_bytes);

            let n_intervals = cursor.read_u64::<LittleEndian>().map_err(|_| truncated())?;
            for _ in 0..n_intervals {
                let start = cursor.read_u64::<LittleEndian>().map_err(|_| truncated())?;
                let stop = cursor.read_u64::<LittleEndian>().map_err(|_| truncated())?;
                if stop <= start {
                    return Err(SearchError::BinlogParseError(format!(
                        "Invalid previous GTIDs interval: {}-{}",
                        start, stop
                    )));
                }
                gtid_set.add_range(&uuid, GtidRange::new(start, stop - 1)?)?;
            }
        }

        Ok(gtid_set)
    }
}

/// UUID 바이트 배열을 문자열로 변환
pub fn format_uuid(bytes: &[u8; 16]) -> String {
    Uuid::from_bytes(*bytes).hyphenated().to_string()
}

/// 서버 버전 문자열이 binlog 체크섬을 지원하는지 (MySQL 5.6.1+, MariaDB 5.3+)
fn mysql_version_has_checksum(version: &str) -> bool {
    let numbers: Vec<u32> = version
        .split(|c: char| !c.is_ascii_digit())
        .take(3)
        .map(|s| s.parse().unwrap_or(0))
        .collect();
    let major = numbers.first().copied().unwrap_or(0);
    let minor = numbers.get(1).copied().unwrap_or(0);
    let patch = numbers.get(2).copied().unwrap_or(0);

    if version.contains("MariaDB") {
        return (major, minor) >= (5, 3);
    }
    (major, minor, patch) >= (5, 6, 1)
}

/// 상태를 가지는 이벤트 디코더
///
/// FORMAT_DESCRIPTION 이벤트에서 체크섬 알고리즘을 기억하고, 이후 이벤트마다
/// CRC32를 검증한 뒤 본문에서 떼어냅니다.
///
/// 제한: TRANSACTION_PAYLOAD 이벤트(`binlog_transaction_compression=ON`)는 압축을
/// 풀지 않고 `Unknown` 데이터로 넘깁니다. 그 안의 XID는 보이지 않으므로 압축된
/// 트랜잭션은 트래커에서 커밋되지 않습니다. 처음 만났을 때 경고를 한 번 남깁니다.
#[derive(Debug, Clone)]
pub struct BinlogDecoder {
    checksum: ChecksumAlgorithm,
    compressed_seen: bool,
}

impl Default for BinlogDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BinlogDecoder {
    pub fn new() -> Self {
        BinlogDecoder {
            checksum: ChecksumAlgorithm::None,
            compressed_seen: false,
        }
    }

    /// 포맷 설명 이벤트를 받기 전부터 체크섬 방식을 알고 있을 때 (복제 스트림)
    pub fn with_checksum(checksum: ChecksumAlgorithm) -> Self {
        BinlogDecoder {
            checksum,
            compressed_seen: false,
        }
    }

    pub fn checksum(&self) -> ChecksumAlgorithm {
        self.checksum
    }

    /// 압축된 트랜잭션 페이로드를 만난 적이 있는지
    pub fn compressed_seen(&self) -> bool {
        self.compressed_seen
    }

    /// 헤더를 포함한 이벤트 하나를 디코딩
    pub fn decode(&mut self, data: &[u8]) -> Result<BinlogEvent> {
        let header = BinlogParser::parse_header(data)?;
        if (header.event_length as usize) < EVENT_HEADER_SIZE {
            return Err(SearchError::BinlogParseError(format!(
                "Invalid event length {} at position {}",
                header.event_length, header.next_pos
            )));
        }

        let checksum = if header.event_type == EventType::FormatDescriptionEvent {
            let fde = BinlogParser::parse_format_description_event(&data[EVENT_HEADER_SIZE..])?;
            self.checksum = fde.checksum;
            fde.checksum
        } else {
            self.checksum
        };

        let payload_end = match checksum {
            ChecksumAlgorithm::Crc32 => {
                if data.len() < EVENT_HEADER_SIZE + CHECKSUM_SIZE {
                    return Err(SearchError::BinlogParseError(
                        "Event too short for checksum".to_string(),
                    ));
                }
                let split = data.len() - CHECKSUM_SIZE;
                verify_checksum(&data[..split], &data[split..], header.next_pos)?;
                split
            }
            ChecksumAlgorithm::None => data.len(),
        };
        let payload = &data[EVENT_HEADER_SIZE..payload_end];

        trace!(
            "Decoding {:?} event, {} bytes payload, next_pos={}",
            header.event_type,
            payload.len(),
            header.next_pos
        );

        let data = match header.event_type {
            EventType::FormatDescriptionEvent => BinlogEventData::FormatDescription(
                BinlogParser::parse_format_description_event(&data[EVENT_HEADER_SIZE..])?,
            ),
            EventType::QueryEvent => BinlogEventData::Query(BinlogParser::parse_query_event(payload)?),
            EventType::XidEvent => BinlogEventData::Xid(BinlogParser::parse_xid_event(payload)?),
            EventType::RotateEvent => {
                BinlogEventData::Rotate(BinlogParser::parse_rotate_event(payload)?)
            }
            EventType::GtidEvent => BinlogEventData::Gtid(BinlogParser::parse_gtid_event(payload)?),
            EventType::PreviousGtidsEvent => BinlogEventData::PreviousGtids(
                BinlogParser::parse_previous_gtids_event(payload)?.to_string(),
            ),
            EventType::TransactionPayloadEvent => {
                if !self.compressed_seen {
                    self.compressed_seen = true;
                    warn!(
                        "Compressed transaction payload at position {}: commits inside it are not tracked",
                        header.next_pos
                    );
                }
                BinlogEventData::Unknown
            }
            _ => BinlogEventData::Unknown,
        };

        Ok(BinlogEvent { header, data })
    }
}

fn verify_checksum(body: &[u8], trailer: &[u8], position: u32) -> Result<()> {
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(SearchError::ChecksumMismatch {
            position,
            expected,
            actual,
        });
    }
    Ok(())
}

/// 로컬 binlog 파일에서 이벤트를 순서대로 읽는 리더
pub struct BinlogFileReader {
    path: PathBuf,
    reader: BufReader<File>,
    decoder: BinlogDecoder,
}

impl BinlogFileReader {
    /// 파일 처음(매직 넘버 직후)부터 읽기
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_at(path, BINLOG_MAGIC.len() as u64)
    }

    /// 지정한 오프셋부터 읽기
    ///
    /// 오프셋이 파일 시작보다 뒤라면 체크섬 방식을 알기 위해 첫 이벤트(FDE)를
    /// 먼저 디코딩한 뒤 이동합니다.
    pub fn open_at(path: impl AsRef<Path>, offset: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            SearchError::IoError(format!("Failed to open {}: {}", path.display(), e))
        })?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(|e| {
            SearchError::BinlogParseError(format!("{}: {}", path.display(), e))
        })?;
        BinlogParser::verify_magic(&magic)?;

        let mut file_reader = BinlogFileReader {
            path,
            reader,
            decoder: BinlogDecoder::new(),
        };

        if offset > BINLOG_MAGIC.len() as u64 {
            file_reader.read_event()?;
            file_reader.reader.seek(SeekFrom::Start(offset))?;
        }

        debug!("Opened binlog {} at offset {}", file_reader.path.display(), offset);
        Ok(file_reader)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_event(&mut self) -> Result<Option<BinlogEvent>> {
        let mut header = [0u8; EVENT_HEADER_SIZE];
        match read_full(&mut self.reader, &mut header)? {
            0 => return Ok(None),
            n if n < EVENT_HEADER_SIZE => {
                return Err(SearchError::BinlogParseError(format!(
                    "{}: truncated event header ({} bytes)",
                    self.path.display(),
                    n
                )))
            }
            _ => {}
        }

        let parsed = BinlogParser::parse_header(&header)?;
        let event_length = parsed.event_length as usize;
        if event_length < EVENT_HEADER_SIZE {
            return Err(SearchError::BinlogParseError(format!(
                "{}: invalid event length {}",
                self.path.display(),
                event_length
            )));
        }

        let mut buffer = vec![0u8; event_length];
        buffer[..EVENT_HEADER_SIZE].copy_from_slice(&header);
        self.reader
            .read_exact(&mut buffer[EVENT_HEADER_SIZE..])
            .map_err(|e| {
                SearchError::BinlogParseError(format!(
                    "{}: truncated event at {}: {}",
                    self.path.display(),
                    parsed.start_pos(),
                    e
                ))
            })?;

        self.decoder.decode(&buffer).map(Some)
    }
}

impl EventSource for BinlogFileReader {
    fn next_event(&mut self) -> Result<Option<BinlogEvent>> {
        self.read_event()
    }
}

/// EOF 전까지 버퍼를 채우고 읽은 바이트 수를 반환
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
