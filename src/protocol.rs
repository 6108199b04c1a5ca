//! MySQL 프로토콜 패킷 처리
//!
//! mysql-binlog-connector-java의 PacketChannel과 동일한 기능 제공

use crate::error::{Result, SearchError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Read;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// 한 패킷에 담을 수 있는 최대 본문 길이 (이보다 길면 다음 패킷으로 이어짐)
pub const MAX_PACKET_LENGTH: usize = 0x00FF_FFFF;

/// MySQL 패킷 채널
pub struct PacketChannel<S = TcpStream> {
    stream: S,
    sequence: u8,
}

impl PacketChannel<TcpStream> {
    /// 새 패킷 채널 생성 (TCP 연결)
    pub async fn connect(hostname: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", hostname, port);
        let stream = TcpStream::connect(&addr).await.map_err(|e| {
            SearchError::ConnectionError(format!("Failed to connect to {}: {}", addr, e))
        })?;

        debug!("Connected to MySQL at {}", addr);

        Ok(PacketChannel::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PacketChannel<S> {
    pub fn new(stream: S) -> Self {
        PacketChannel {
            stream,
            sequence: 0,
        }
    }

    /// 마지막으로 받은 패킷의 다음 시퀀스 번호
    pub fn next_sequence(&self) -> u8 {
        self.sequence
    }

    /// 패킷 읽기 (최대 길이를 넘는 패킷은 이어붙임)
    pub async fn read_packet(&mut self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        loop {
            let (length, sequence) = self.read_header().await?;
            self.sequence = sequence.wrapping_add(1);

            let start = payload.len();
            payload.resize(start + length, 0);
            self.stream
                .read_exact(&mut payload[start..])
                .await
                .map_err(|e| SearchError::IoError(format!("Failed to read packet body: {}", e)))?;

            if length < MAX_PACKET_LENGTH {
                return Ok(payload);
            }
        }
    }

    async fn read_header(&mut self) -> Result<(usize, u8)> {
        // 패킷 헤더 (3 bytes length + 1 byte sequence)
        let mut header = [0u8; 4];
        self.stream
            .read_exact(&mut header)
            .await
            .map_err(|e| SearchError::IoError(format!("Failed to read packet header: {}", e)))?;

        let length = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        Ok((length, header[3]))
    }

    /// 패킷 쓰기
    pub async fn write_packet(&mut self, data: &[u8], sequence: u8) -> Result<()> {
        let mut header = Vec::with_capacity(4);
        WriteBytesExt::write_u24::<LittleEndian>(&mut header, data.len() as u32)?;
        WriteBytesExt::write_u8(&mut header, sequence)?;

        self.stream
            .write_all(&header)
            .await
            .map_err(|e| SearchError::IoError(format!("Failed to write header: {}", e)))?;
        self.stream
            .write_all(data)
            .await
            .map_err(|e| SearchError::IoError(format!("Failed to write data: {}", e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| SearchError::IoError(format!("Failed to flush: {}", e)))?;

        self.sequence = sequence.wrapping_add(1);
        Ok(())
    }

    /// 새 명령 시작 (시퀀스 0)
    pub async fn write_command(&mut self, data: &[u8]) -> Result<()> {
        self.write_packet(data, 0).await
    }
}

/// Greeting 패킷 파싱
#[derive(Debug, Clone)]
pub struct GreetingPacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub thread_id: u32,
    pub scramble: Vec<u8>,
    pub server_capabilities: u32,
    pub server_collation: u8,
    pub server_status: u16,
    pub auth_plugin: String,
}

impl GreetingPacket {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if is_error_packet(data) {
            return Err(ErrorPacket::parse(data).into_error("Server refused connection"));
        }

        let mut cursor = std::io::Cursor::new(data);
        let field = |name: &'static str| {
            move |e: std::io::Error| {
                SearchError::ProtocolError(format!("Failed to read {}: {}", name, e))
            }
        };

        let protocol_version = ReadBytesExt::read_u8(&mut cursor).map_err(field("protocol version"))?;
        let server_version = read_null_terminated_string(&mut cursor)?;
        let thread_id =
            ReadBytesExt::read_u32::<LittleEndian>(&mut cursor).map_err(field("thread ID"))?;

        // Auth plugin data part 1 (8 bytes)
        let mut scramble = vec![0u8; 8];
        Read::read_exact(&mut cursor, &mut scramble).map_err(field("scramble part 1"))?;

        // Filler (1 byte, always 0x00)
        ReadBytesExt::read_u8(&mut cursor).map_err(field("filler"))?;

        let capabilities_lower =
            ReadBytesExt::read_u16::<LittleEndian>(&mut cursor).map_err(field("capabilities"))?;
        let server_collation = ReadBytesExt::read_u8(&mut cursor).map_err(field("collation"))?;
        let server_status =
            ReadBytesExt::read_u16::<LittleEndian>(&mut cursor).map_err(field("status"))?;
        let capabilities_upper = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(field("capabilities upper"))?;
        let server_capabilities = (capabilities_upper as u32) << 16 | capabilities_lower as u32;

        let auth_data_len = ReadBytesExt::read_u8(&mut cursor).map_err(field("auth data length"))?;

        // Reserved (10 bytes)
        let mut reserved = [0u8; 10];
        Read::read_exact(&mut cursor, &mut reserved).map_err(field("reserved"))?;

        // Auth plugin data part 2 (at least 13 bytes, 마지막은 null)
        let scramble_len = std::cmp::max(13, auth_data_len.saturating_sub(8)) as usize;
        let mut scramble_part2 = vec![0u8; scramble_len];
        Read::read_exact(&mut cursor, &mut scramble_part2).map_err(field("scramble part 2"))?;
        scramble.extend_from_slice(&scramble_part2[..scramble_len - 1]);

        let auth_plugin = if (cursor.position() as usize) < data.len() {
            read_null_terminated_string(&mut cursor).unwrap_or_default()
        } else {
            String::new()
        };

        Ok(GreetingPacket {
            protocol_version,
            server_version,
            thread_id,
            scramble,
            server_capabilities,
            server_collation,
            server_status,
            auth_plugin,
        })
    }
}

/// ERR 패킷 (0xFF)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPacket {
    pub code: u16,
    pub sql_state: String,
    pub message: String,
}

impl ErrorPacket {
    pub fn parse(data: &[u8]) -> Self {
        let code = match data {
            [_, lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
            _ => 0,
        };

        // 0xFF, code(2), '#', sql_state(5), message
        let (sql_state, message) = match data.get(3) {
            Some(b'#') if data.len() >= 9 => (
                String::from_utf8_lossy(&data[4..9]).into_owned(),
                String::from_utf8_lossy(&data[9..]).into_owned(),
            ),
            _ => (
                String::new(),
                String::from_utf8_lossy(data.get(3..).unwrap_or_default()).into_owned(),
            ),
        };

        ErrorPacket {
            code,
            sql_state,
            message,
        }
    }

    pub fn into_error(self, context: &str) -> SearchError {
        SearchError::ProtocolError(format!(
            "{}: [{}] {} {}",
            context, self.code, self.sql_state, self.message
        ))
    }
}

/// null로 끝나는 문자열 읽기
fn read_null_terminated_string<R: Read>(reader: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        let byte = ReadBytesExt::read_u8(reader).map_err(|e| {
            SearchError::ProtocolError(format!("Failed to read string byte: {}", e))
        })?;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    String::from_utf8(bytes)
        .map_err(|e| SearchError::ProtocolError(format!("Invalid UTF-8 in string: {}", e)))
}

/// Error 패킷 확인
pub fn is_error_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0xFF
}

/// OK 패킷 확인
pub fn is_ok_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0x00
}

/// EOF 패킷 확인 (0xFE, 길이 < 9)
pub fn is_eof_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0xFE && data.len() < 9
}

/// 인증 추가 데이터 (0x01, caching_sha2_password 상태 등)
pub fn is_auth_more_data_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0x01
}

/// 인증 방식 변경 요청 (0xFE, 플러그인 이름 + 새 scramble)
pub fn is_auth_switch_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0xFE && data.len() >= 9
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio_test::io::Builder;

    /// 길이 + 시퀀스 헤더를 붙인 패킷
    pub(crate) fn frame(sequence: u8, payload: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(payload.len() + 4);
        packet.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..3]);
        packet.push(sequence);
        packet.extend_from_slice(payload);
        packet
    }

    /// mysql_native_password 서버의 greeting 본문
    pub(crate) fn greeting(scramble: &[u8; 20]) -> Vec<u8> {
        greeting_with_plugin(scramble, "mysql_native_password")
    }

    /// 지정한 기본 인증 플러그인을 알리는 greeting 본문
    pub(crate) fn greeting_with_plugin(scramble: &[u8; 20], plugin: &str) -> Vec<u8> {
        let mut packet = vec![10];
        packet.extend_from_slice(b"8.0.36\0");
        packet.extend_from_slice(&7u32.to_le_bytes());
        packet.extend_from_slice(&scramble[..8]);
        packet.push(0);
        packet.extend_from_slice(&0xF7FFu16.to_le_bytes());
        packet.push(33);
        packet.extend_from_slice(&2u16.to_le_bytes());
        packet.extend_from_slice(&0x81FFu16.to_le_bytes());
        packet.push(21);
        packet.extend_from_slice(&[0u8; 10]);
        packet.extend_from_slice(&scramble[8..]);
        packet.push(0);
        packet.extend_from_slice(plugin.as_bytes());
        packet.push(0);
        packet
    }

    #[test]
    fn test_is_error_packet() {
        assert!(is_error_packet(&[0xFF, 0x01, 0x02]));
        assert!(!is_error_packet(&[0x00, 0x01, 0x02]));
    }

    #[test]
    fn test_is_ok_packet() {
        assert!(is_ok_packet(&[0x00, 0x01, 0x02]));
        assert!(!is_ok_packet(&[0xFF, 0x01, 0x02]));
    }

    #[test]
    fn test_eof_and_auth_switch_packets() {
        assert!(is_eof_packet(&[0xFE, 0, 0, 2, 0]));
        assert!(!is_eof_packet(&[0xFE; 20]));
        assert!(is_auth_switch_packet(b"\xFEmysql_native_password\0abcdefghijklmnopqrst\0"));
    }

    #[test]
    fn test_parse_greeting() {
        let scramble: [u8; 20] = *b"abcdefghijklmnopqrst";
        let greeting = GreetingPacket::parse(&greeting(&scramble)).unwrap();
        assert_eq!(greeting.protocol_version, 10);
        assert_eq!(greeting.server_version, "8.0.36");
        assert_eq!(greeting.thread_id, 7);
        assert_eq!(greeting.scramble, scramble.to_vec());
        assert_eq!(greeting.auth_plugin, "mysql_native_password");

        let greeting =
            GreetingPacket::parse(&greeting_with_plugin(&scramble, "caching_sha2_password")).unwrap();
        assert_eq!(greeting.auth_plugin, "caching_sha2_password");
    }

    #[test]
    fn test_parse_error_packet() {
        let mut packet = vec![0xFF];
        packet.extend_from_slice(&1236u16.to_le_bytes());
        packet.extend_from_slice(b"#HY000Could not find first log file name");
        let error = ErrorPacket::parse(&packet);
        assert_eq!(error.code, 1236);
        assert_eq!(error.sql_state, "HY000");
        assert_eq!(error.message, "Could not find first log file name");
    }

    #[tokio::test]
    async fn test_read_and_write_packets() {
        let stream = Builder::new()
            .read(&frame(0, b"hello"))
            .write(&frame(1, b"world"))
            .build();
        let mut channel = PacketChannel::new(stream);

        assert_eq!(channel.read_packet().await.unwrap(), b"hello");
        assert_eq!(channel.next_sequence(), 1);
        channel.write_packet(b"world", 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_closed_stream_is_error() {
        let stream = Builder::new().read(&[0x05, 0x00]).build();
        let mut channel = PacketChannel::new(stream);
        assert!(channel.read_packet().await.is_err());
    }
}
