//! MySQL 인증 처리
//!
//! mysql_native_password, caching_sha2_password(fast auth) 구현

use crate::error::{Result, SearchError};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

pub const NATIVE_PASSWORD_PLUGIN: &str = "mysql_native_password";
pub const CACHING_SHA2_PASSWORD_PLUGIN: &str = "caching_sha2_password";

/// caching_sha2_password의 AuthMoreData 상태 바이트
pub const FAST_AUTH_SUCCESS: u8 = 0x03;
pub const FULL_AUTH_REQUIRED: u8 = 0x04;

/// Client capability flags
pub mod capabilities {
    pub const LONG_PASSWORD: u32 = 1;
    pub const LONG_FLAG: u32 = 4;
    pub const CONNECT_WITH_DB: u32 = 8;
    pub const PROTOCOL_41: u32 = 512;
    pub const TRANSACTIONS: u32 = 8192;
    pub const SECURE_CONNECTION: u32 = 32768;
    pub const MULTI_STATEMENTS: u32 = 1 << 16;
    pub const MULTI_RESULTS: u32 = 1 << 17;
    pub const PLUGIN_AUTH: u32 = 1 << 19;
}

/// Native password 인증 응답 생성
pub fn create_auth_response(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    // SHA1(password)
    let stage1 = sha1(password.as_bytes());

    // SHA1(SHA1(password))
    let stage2 = sha1(&stage1);

    // SHA1(scramble + SHA1(SHA1(password)))
    let mut combined = scramble.to_vec();
    combined.extend_from_slice(&stage2);
    let stage3 = sha1(&combined);

    // XOR(SHA1(password), SHA1(scramble + SHA1(SHA1(password))))
    stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect()
}

fn sha1(data: &[u8]) -> Vec<u8> {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// caching_sha2_password 인증 응답 생성
///
/// XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + scramble))
pub fn create_sha2_auth_response(password: &str, scramble: &[u8]) -> Vec<u8> {
    use sha2::{Digest, Sha256};

    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha256::digest(password.as_bytes());
    let stage2 = Sha256::digest(stage1);

    let mut hasher = Sha256::new();
    hasher.update(stage2);
    hasher.update(scramble);
    let stage3 = hasher.finalize();

    stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect()
}

/// 플러그인에 맞는 인증 응답
pub fn scramble_password(plugin: &str, password: &str, scramble: &[u8]) -> Result<Vec<u8>> {
    match plugin {
        NATIVE_PASSWORD_PLUGIN => Ok(create_auth_response(password, scramble)),
        CACHING_SHA2_PASSWORD_PLUGIN => Ok(create_sha2_auth_response(password, scramble)),
        other => Err(SearchError::ConnectionError(format!(
            "Unsupported authentication plugin: {}",
            other
        ))),
    }
}

/// 서버가 제안한 플러그인 중 처리 가능한 것 (그 외에는 native로 시작하고 auth switch를 기다림)
pub fn initial_plugin(server_plugin: &str) -> &'static str {
    if server_plugin == CACHING_SHA2_PASSWORD_PLUGIN {
        CACHING_SHA2_PASSWORD_PLUGIN
    } else {
        NATIVE_PASSWORD_PLUGIN
    }
}

/// 인증 패킷 생성
pub fn create_handshake_response(
    username: &str,
    password: &str,
    database: Option<&str>,
    scramble: &[u8],
    collation: u8,
    plugin: &str,
) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();

    let mut capabilities = capabilities::LONG_PASSWORD
        | capabilities::LONG_FLAG
        | capabilities::PROTOCOL_41
        | capabilities::TRANSACTIONS
        | capabilities::SECURE_CONNECTION
        | capabilities::MULTI_STATEMENTS
        | capabilities::MULTI_RESULTS
        | capabilities::PLUGIN_AUTH;

    if database.is_some() {
        capabilities |= capabilities::CONNECT_WITH_DB;
    }

    buffer.write_u32::<LittleEndian>(capabilities)?;

    // Max packet size (4 bytes) - 0 means default (16MB)
    buffer.write_u32::<LittleEndian>(0)?;

    buffer.write_u8(collation)?;

    // Reserved (23 bytes of zeros)
    buffer.write_all(&[0u8; 23])?;

    buffer.write_all(username.as_bytes())?;
    buffer.write_u8(0)?;

    let auth_response = scramble_password(plugin, password, scramble)?;
    buffer.write_u8(auth_response.len() as u8)?;
    buffer.write_all(&auth_response)?;

    if let Some(db) = database {
        buffer.write_all(db.as_bytes())?;
        buffer.write_u8(0)?;
    }

    buffer.write_all(plugin.as_bytes())?;
    buffer.write_u8(0)?;

    Ok(buffer)
}

/// 인증 방식 변경 요청 (0xFE)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchRequest {
    pub plugin: String,
    pub scramble: Vec<u8>,
}

impl AuthSwitchRequest {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let body = data.strip_prefix(&[0xFE]).ok_or_else(|| {
            SearchError::ProtocolError("Not an auth switch request".to_string())
        })?;

        let name_end = body.iter().position(|&b| b == 0).ok_or_else(|| {
            SearchError::ProtocolError("Auth switch request without plugin name".to_string())
        })?;
        let plugin = String::from_utf8_lossy(&body[..name_end]).into_owned();

        let mut scramble = body[name_end + 1..].to_vec();
        if scramble.last() == Some(&0) {
            scramble.pop();
        }

        Ok(AuthSwitchRequest { plugin, scramble })
    }

    /// 새 scramble로 계산한 응답
    pub fn response(&self, password: &str) -> Result<Vec<u8>> {
        scramble_password(&self.plugin, password, &self.scramble)
    }
}
