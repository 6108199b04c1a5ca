//! 원격 복제 스트림 검색
//!
//! 서버에 복제 클라이언트로 접속해 binlog 이벤트를 받으면서 트래커를 돌립니다.
//! 이벤트가 `idle_timeout` 동안 오지 않으면 따라잡은 것으로 보고 검색을 끝냅니다.

use crate::auth::{self, AuthSwitchRequest};
use crate::binlog::BinlogDecoder;
use crate::config::SearchConfig;
use crate::connection::{ConnectionConfig, MySqlConnection};
use crate::error::{Result, SearchError};
use crate::events::{BinlogEvent, ChecksumAlgorithm};
use crate::gtid::GtidSet;
use crate::offset::{BinlogPosition, GtidPosition};
use crate::protocol::{self, ErrorPacket, GreetingPacket, PacketChannel};
use crate::tracker::{ScanFilter, ScanOutcome, Step, TransactionTracker};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// COM_QUERY 명령어 코드
const COM_QUERY: u8 = 0x03;

/// COM_BINLOG_DUMP 명령어 코드
const COM_BINLOG_DUMP: u8 = 0x12;

/// 서버가 보내는 이벤트를 그대로 검증할 수 있도록 체크섬 방식을 서버와 맞춤
const SET_CHECKSUM_QUERY: &str = "SET @master_binlog_checksum = @@global.binlog_checksum";

/// 원격 서버 검색기
pub struct RemoteSearcher {
    connection: ConnectionConfig,
    start_file: Option<String>,
    filter: ScanFilter,
    idle_timeout: Duration,
}

impl RemoteSearcher {
    pub fn new(connection: ConnectionConfig, filter: ScanFilter) -> Self {
        RemoteSearcher {
            connection,
            start_file: None,
            filter,
            idle_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let connection = config.remote.clone().ok_or_else(|| {
            SearchError::ConfigError("DB_HOST is required for remote search".to_string())
        })?;

        Ok(RemoteSearcher {
            connection,
            start_file: config.start_file.clone(),
            filter: config.scan_filter(),
            idle_timeout: config.idle_timeout,
        })
    }

    pub fn with_start_file(mut self, start_file: impl Into<String>) -> Self {
        self.start_file = Some(start_file.into());
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// 서버 점검 후 복제 스트림을 열어 검색
    pub async fn search(&self, target: &GtidSet) -> Result<Option<GtidPosition>> {
        info!(
            "Starting remote search on {} for {}",
            self.connection.address(),
            target
        );

        let mut conn = MySqlConnection::connect(&self.connection).await?;
        let server = conn.preflight(target, self.start_file.as_deref()).await?;
        if let Err(e) = conn.close().await {
            debug!("Pre-flight connection close failed: {}", e);
        }

        let channel = PacketChannel::connect(&self.connection.hostname, self.connection.port).await?;
        let outcome = self
            .search_on(channel, target, &server.start_file, server.checksum)
            .await?;
        Ok(outcome.position)
    }

    /// 이미 연결된 채널 위에서 검색 (핸드셰이크부터)
    pub async fn search_on<S>(
        &self,
        channel: PacketChannel<S>,
        target: &GtidSet,
        start_file: &str,
        checksum: ChecksumAlgorithm,
    ) -> Result<ScanOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stream = ReplicationStream::start(
            channel,
            &self.connection,
            &BinlogPosition::start_of(start_file.to_string()),
            checksum,
            self.idle_timeout,
        )
        .await?;

        let mut tracker =
            TransactionTracker::new(target.clone(), self.filter.clone(), start_file).follow_rotations();
        let mut events = 0u64;
        let mut stopped = None;

        while let Some(event) = stream.next_event().await? {
            events += 1;
            if let Step::Stop(reason) = tracker.process(&event) {
                stopped = Some(reason);
                break;
            }
        }

        info!(
            "Remote scan finished after {} events (last file: {}, stop: {:?})",
            events,
            tracker.current_file(),
            stopped
        );

        Ok(ScanOutcome {
            position: tracker.finish(),
            stopped,
            events,
        })
    }
}

/// 복제 프로토콜 위의 binlog 이벤트 스트림
pub struct ReplicationStream<S> {
    channel: PacketChannel<S>,
    decoder: BinlogDecoder,
    idle_timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ReplicationStream<S> {
    /// 인증, 체크섬 설정, COM_BINLOG_DUMP 전송
    pub async fn start(
        mut channel: PacketChannel<S>,
        config: &ConnectionConfig,
        from: &BinlogPosition,
        checksum: ChecksumAlgorithm,
        idle_timeout: Duration,
    ) -> Result<Self> {
        authenticate(&mut channel, config).await?;

        if checksum == ChecksumAlgorithm::Crc32 {
            execute(&mut channel, SET_CHECKSUM_QUERY).await?;
            debug!("Binlog checksum set to server value (CRC32)");
        }

        let command = binlog_dump_command(config.server_id, from)?;
        channel.write_command(&command).await?;
        info!("Sent COM_BINLOG_DUMP: {}", from);

        Ok(ReplicationStream {
            channel,
            decoder: BinlogDecoder::with_checksum(checksum),
            idle_timeout,
        })
    }

    /// 다음 이벤트 (`None`은 idle timeout 또는 서버의 EOF)
    pub async fn next_event(&mut self) -> Result<Option<BinlogEvent>> {
        let packet = match tokio::time::timeout(self.idle_timeout, self.channel.read_packet()).await {
            Ok(packet) => packet?,
            Err(_) => {
                info!(
                    "No binlog events for {:?}, treating stream as caught up",
                    self.idle_timeout
                );
                return Ok(None);
            }
        };

        match packet.first().copied() {
            Some(0x00) => self.decoder.decode(&packet[1..]).map(Some),
            Some(0xFF) => Err(ErrorPacket::parse(&packet).into_error("Binlog stream error")),
            _ if protocol::is_eof_packet(&packet) => {
                info!("Received EOF packet - stream ended");
                Ok(None)
            }
            other => Err(SearchError::ProtocolError(format!(
                "Unexpected packet in binlog stream: {:?}",
                other
            ))),
        }
    }
}

/// 핸드셰이크 및 인증
///
/// caching_sha2_password는 서버 캐시에 남은 계정(fast auth)만 처리합니다.
/// full authentication은 TLS 또는 RSA 공개키 교환이 필요해 연결 에러로 끝납니다.
async fn authenticate<S>(channel: &mut PacketChannel<S>, config: &ConnectionConfig) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting = GreetingPacket::parse(&channel.read_packet().await?)?;
    info!(
        "MySQL Server version: {}, Thread ID: {}, auth plugin: {}",
        greeting.server_version, greeting.thread_id, greeting.auth_plugin
    );

    let mut plugin = auth::initial_plugin(&greeting.auth_plugin).to_string();
    let response = auth::create_handshake_response(
        &config.username,
        &config.password,
        None,
        &greeting.scramble,
        greeting.server_collation,
        &plugin,
    )?;
    let sequence = channel.next_sequence();
    channel.write_packet(&response, sequence).await?;

    loop {
        let result = channel.read_packet().await?;

        if protocol::is_ok_packet(&result) {
            break;
        }
        if protocol::is_error_packet(&result) {
            return Err(match ErrorPacket::parse(&result).into_error("Authentication failed") {
                SearchError::ProtocolError(message) => SearchError::ConnectionError(message),
                other => other,
            });
        }
        if protocol::is_auth_switch_packet(&result) {
            let request = AuthSwitchRequest::parse(&result)?;
            debug!("Server requested auth switch to {}", request.plugin);
            let response = request.response(&config.password)?;
            let sequence = channel.next_sequence();
            channel.write_packet(&response, sequence).await?;
            plugin = request.plugin;
            continue;
        }
        if protocol::is_auth_more_data_packet(&result)
            && plugin == auth::CACHING_SHA2_PASSWORD_PLUGIN
        {
            match result.get(1).copied() {
                Some(auth::FAST_AUTH_SUCCESS) => {
                    debug!("caching_sha2_password fast auth succeeded");
                    continue;
                }
                Some(auth::FULL_AUTH_REQUIRED) => {
                    return Err(SearchError::ConnectionError(format!(
                        "caching_sha2_password full authentication required for '{}' (TLS is not supported); \
                         log in once with a TLS client to populate the server cache",
                        config.username
                    )));
                }
                other => {
                    return Err(SearchError::ConnectionError(format!(
                        "Unexpected caching_sha2_password status: {:?}",
                        other
                    )));
                }
            }
        }

        return Err(SearchError::ConnectionError(format!(
            "Unexpected authentication response: 0x{:02x}",
            result.first().copied().unwrap_or_default()
        )));
    }

    info!("Authentication successful");
    Ok(())
}

/// 결과 집합이 없는 쿼리 실행
async fn execute<S>(channel: &mut PacketChannel<S>, sql: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut packet = Vec::with_capacity(sql.len() + 1);
    packet.push(COM_QUERY);
    packet.extend_from_slice(sql.as_bytes());
    channel.write_command(&packet).await?;

    let result = channel.read_packet().await?;
    if protocol::is_error_packet(&result) {
        let error = ErrorPacket::parse(&result);
        warn!("Query failed: {} ({})", sql, error.message);
        return Err(SearchError::QueryError(format!(
            "{}: [{}] {}",
            sql, error.code, error.message
        )));
    }
    Ok(())
}

/// COM_BINLOG_DUMP 패킷 생성
pub fn binlog_dump_command(server_id: u32, from: &BinlogPosition) -> Result<Vec<u8>> {
    let position = u32::try_from(from.position).map_err(|_| {
        SearchError::ProtocolError(format!("Binlog position too large: {}", from.position))
    })?;

    let mut command = Vec::with_capacity(11 + from.filename.len());
    command.write_u8(COM_BINLOG_DUMP)?;
    command.write_u32::<LittleEndian>(position)?;
    // flags: 0 = blocking (서버가 새 이벤트를 기다림)
    command.write_u16::<LittleEndian>(0)?;
    command.write_u32::<LittleEndian>(server_id)?;
    command.write_all(from.filename.as_bytes())?;
    Ok(command)
}
