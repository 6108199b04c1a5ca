//! MySQL 데이터베이스 연결 관리
//!
//! 복제 스트림을 열기 전에 일반 SQL 연결로 서버 상태를 확인합니다.

use crate::error::{Result, SearchError};
use crate::events::ChecksumAlgorithm;
use crate::gtid::GtidSet;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Row};
use std::time::Duration;
use tracing::{debug, info, warn};

/// MySQL 연결 설정
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// 복제 클라이언트로 등록할 server_id (서버의 다른 replica와 겹치면 안 됨)
    pub server_id: u32,
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            hostname: "localhost".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: String::new(),
            server_id: 100,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionConfig {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        ConnectionConfig {
            hostname: hostname.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    fn build_opts(&self) -> Opts {
        OptsBuilder::default()
            .ip_or_hostname(self.hostname.clone())
            .tcp_port(self.port)
            .user(Some(self.username.clone()))
            .pass(Some(self.password.clone()))
            .into()
    }
}

/// 복제 스트림을 열기 전에 확인한 서버 정보
#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// 서버의 binlog 체크섬 방식
    pub checksum: ChecksumAlgorithm,
    /// 복제를 시작할 binlog 파일
    pub start_file: String,
    pub executed_gtid_set: GtidSet,
}

/// MySQL 연결 래퍼
pub struct MySqlConnection {
    conn: Conn,
}

impl MySqlConnection {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let conn = tokio::time::timeout(config.timeout, Conn::new(config.build_opts()))
            .await
            .map_err(|_| SearchError::Timeout)?
            .map_err(|e| {
                SearchError::ConnectionError(format!(
                    "Failed to connect to MySQL at {}: {}",
                    config.address(),
                    e
                ))
            })?;

        debug!("Connected to MySQL at {}", config.address());
        Ok(MySqlConnection { conn })
    }

    /// GTID 모드 활성 여부 확인
    pub async fn is_gtid_mode_enabled(&mut self) -> Result<bool> {
        Ok(self
            .get_variable("gtid_mode")
            .await?
            .map(|mode| mode.eq_ignore_ascii_case("ON"))
            .unwrap_or(false))
    }

    /// 현재 실행된 GTID 집합 조회
    pub async fn get_executed_gtid_set(&mut self) -> Result<GtidSet> {
        let executed: Option<String> = self
            .conn
            .query_first("SELECT @@global.gtid_executed")
            .await
            .map_err(|e| SearchError::QueryError(format!("Failed to query gtid_executed: {}", e)))?;

        match executed {
            Some(text) => GtidSet::parse(&text),
            None => Ok(GtidSet::new()),
        }
    }

    /// 변수 조회
    pub async fn get_variable(&mut self, name: &str) -> Result<Option<String>> {
        let query = format!("SHOW GLOBAL VARIABLES LIKE '{}'", name);
        let result: Vec<(String, String)> = self
            .conn
            .query(&query)
            .await
            .map_err(|e| SearchError::QueryError(format!("Failed to query {}: {}", name, e)))?;

        Ok(result.into_iter().next().map(|(_, value)| value))
    }

    /// binlog 체크섬 방식 (`binlog_checksum` 변수가 없는 구버전은 NONE)
    pub async fn get_binlog_checksum(&mut self) -> Result<ChecksumAlgorithm> {
        Ok(match self.get_variable("binlog_checksum").await? {
            Some(value) => parse_checksum_name(&value)?,
            None => ChecksumAlgorithm::None,
        })
    }

    /// 서버에 남아있는 binlog 파일 목록 (오래된 순)
    pub async fn list_binary_logs(&mut self) -> Result<Vec<String>> {
        let rows: Vec<Row> = self
            .conn
            .query("SHOW BINARY LOGS")
            .await
            .map_err(|e| SearchError::QueryError(format!("Failed to list binary logs: {}", e)))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.get::<String, _>(0))
            .collect())
    }

    /// 복제 스트림 시작 전 점검
    ///
    /// GTID 모드가 꺼져 있으면 에러, 대상이 `gtid_executed`에 없으면 경고만 남깁니다.
    /// 시작 파일이 없으면 가장 오래된 binlog부터 읽습니다.
    pub async fn preflight(
        &mut self,
        target: &GtidSet,
        start_file: Option<&str>,
    ) -> Result<ServerInfo> {
        if !self.is_gtid_mode_enabled().await? {
            return Err(SearchError::GtidError(
                "GTID mode is not enabled on the server".to_string(),
            ));
        }

        let executed_gtid_set = self.get_executed_gtid_set().await?;
        if !executed_gtid_set.contains_set(target) {
            warn!(
                "Target {} is not fully contained in gtid_executed ({})",
                target, executed_gtid_set
            );
        }

        let checksum = self.get_binlog_checksum().await?;

        let start_file = match start_file {
            Some(file) => file.to_string(),
            None => self
                .list_binary_logs()
                .await?
                .into_iter()
                .next()
                .ok_or(SearchError::NoBinlogFiles)?,
        };

        info!(
            "Server pre-flight done: checksum={:?}, start file={}",
            checksum, start_file
        );

        Ok(ServerInfo {
            checksum,
            start_file,
            executed_gtid_set,
        })
    }

    pub async fn close(self) -> Result<()> {
        self.conn
            .disconnect()
            .await
            .map_err(|e| SearchError::ConnectionError(format!("Failed to disconnect: {}", e)))
    }
}

/// `binlog_checksum` 값 해석
pub fn parse_checksum_name(value: &str) -> Result<ChecksumAlgorithm> {
    match value.trim().to_ascii_uppercase().as_str() {
        "NONE" | "" => Ok(ChecksumAlgorithm::None),
        "CRC32" => Ok(ChecksumAlgorithm::Crc32),
        other => Err(SearchError::ProtocolError(format!(
            "Unsupported binlog checksum: {}",
            other
        ))),
    }
}
