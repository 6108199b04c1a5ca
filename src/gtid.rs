//! GTID (Global Transaction ID) 관리
//!
//! GTID 형식: UUID:transaction-number
//! 여러 서버의 GTID 집합을 추적: "uuid1:1-100:200,uuid2:1-50"

use crate::error::{Result, SearchError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

/// GTID 범위 (양 끝 포함)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GtidRange {
    pub start: u64,
    pub end: u64,
}

impl GtidRange {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        // 트랜잭션 번호는 1부터 시작
        if start == 0 {
            return Err(SearchError::GtidError(
                "Transaction number must be at least 1".to_string(),
            ));
        }
        if start > end {
            return Err(SearchError::GtidError(format!(
                "Invalid range: {} > {}",
                start, end
            )));
        }
        Ok(GtidRange { start, end })
    }

    pub fn contains(&self, value: u64) -> bool {
        value >= self.start && value <= self.end
    }

    /// `other` 범위 전체가 이 범위 안에 있는지
    pub fn covers(&self, other: &GtidRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn merge(&self, other: &GtidRange) -> Option<GtidRange> {
        // 겹치거나 연접한 범위 병합
        if self.end.saturating_add(1) >= other.start && other.end.saturating_add(1) >= self.start {
            Some(GtidRange {
                start: self.start.min(other.start),
                end: self.end.max(other.end),
            })
        } else {
            None
        }
    }

    pub fn len(&self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }
}

/// UUID별 GTID 범위들 (항상 정렬 + 병합 상태 유지)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UUIDGtidSet {
    pub uuid: String,
    pub ranges: Vec<GtidRange>,
}

impl UUIDGtidSet {
    pub fn new(uuid: String) -> Self {
        UUIDGtidSet {
            uuid,
            ranges: Vec::new(),
        }
    }

    pub fn add_range(&mut self, range: GtidRange) {
        self.ranges.push(range);
        self.ranges.sort();

        let mut merged: Vec<GtidRange> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) => match last.merge(&range) {
                    Some(m) => *last = m,
                    None => merged.push(range),
                },
                None => merged.push(range),
            }
        }
        self.ranges = merged;
    }

    pub fn add_gtid(&mut self, sequence: u64) -> Result<()> {
        self.add_range(GtidRange::new(sequence, sequence)?);
        Ok(())
    }

    pub fn contains(&self, sequence: u64) -> bool {
        self.ranges.iter().any(|r| r.contains(sequence))
    }

    /// 병합된 범위이므로 단일 범위가 덮어야 포함
    pub fn contains_range(&self, range: &GtidRange) -> bool {
        self.ranges.iter().any(|r| r.covers(range))
    }

    pub fn min_transaction(&self) -> Option<u64> {
        self.ranges.first().map(|r| r.start)
    }

    pub fn max_transaction(&self) -> Option<u64> {
        self.ranges.last().map(|r| r.end)
    }

    pub fn total_count(&self) -> u64 {
        self.ranges
            .iter()
            .map(GtidRange::len)
            .fold(0u64, u64::saturating_add)
    }

    fn ranges_to_string(&self) -> String {
        let range_strs: Vec<String> = self
            .ranges
            .iter()
            .map(|r| {
                if r.start == r.end {
                    r.start.to_string()
                } else {
                    format!("{}-{}", r.start, r.end)
                }
            })
            .collect();
        range_strs.join(":")
    }
}

/// UUID 하나에 대한 요약 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UuidInfo {
    pub uuid: String,
    pub min_transaction: u64,
    pub max_transaction: u64,
    pub total_count: u64,
}

/// 전체 GTID 집합 (여러 UUID)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GtidSet {
    pub sets: BTreeMap<String, UUIDGtidSet>,
}

impl GtidSet {
    pub fn new() -> Self {
        GtidSet {
            sets: BTreeMap::new(),
        }
    }

    /// 트랜잭션 하나짜리 집합
    pub fn single(uuid: &str, gno: u64) -> Result<Self> {
        let mut set = GtidSet::new();
        set.add_range(uuid, GtidRange::new(gno, gno)?)?;
        Ok(set)
    }

    /// GTID 문자열 파싱
    ///
    /// 지원 형식:
    /// - `uuid:n`
    /// - `uuid:n-m:k-l` (MySQL 표준)
    /// - `uuid1:n-m,uuid2:k` (여러 UUID)
    /// - `uuid:n-m,k` (UUID 없이 이어지는 구간은 직전 UUID에 추가)
    pub fn parse(gtid_str: &str) -> Result<Self> {
        let mut gtid_set = GtidSet::new();

        let gtid_str = gtid_str.trim();
        if gtid_str.is_empty() || gtid_str == "NULL" {
            return Ok(gtid_set);
        }

        let mut current_uuid: Option<String> = None;

        for token in gtid_str.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }

            let intervals: Vec<&str> = if token.contains(':') {
                let mut parts = token.split(':');
                let uuid = normalize_uuid(parts.next().unwrap_or_default())?;
                current_uuid = Some(uuid);
                parts.collect()
            } else {
                vec![token]
            };

            let uuid = current_uuid.clone().ok_or_else(|| {
                SearchError::GtidError(format!("Interval without UUID: {}", token))
            })?;

            for interval in intervals {
                let range = parse_interval(interval.trim())?;
                gtid_set.add_range(&uuid, range)?;
            }
        }

        Ok(gtid_set)
    }

    pub fn add_range(&mut self, uuid: &str, range: GtidRange) -> Result<()> {
        let uuid = normalize_uuid(uuid)?;
        self.sets
            .entry(uuid.clone())
            .or_insert_with(|| UUIDGtidSet::new(uuid))
            .add_range(range);
        Ok(())
    }

    pub fn add_gtid(&mut self, gtid: &str) -> Result<()> {
        let (uuid, sequence) = split_gtid(gtid)?;
        self.add_range(uuid, GtidRange::new(sequence, sequence)?)
    }

    /// "uuid:sequence" 형식의 단일 GTID 포함 여부
    pub fn contains(&self, gtid: &str) -> bool {
        match split_gtid(gtid) {
            Ok((uuid, sequence)) => self.contains_gno(uuid, sequence),
            Err(_) => false,
        }
    }

    pub fn contains_gno(&self, uuid: &str, gno: u64) -> bool {
        let Ok(uuid) = normalize_uuid(uuid) else {
            return false;
        };
        self.sets
            .get(&uuid)
            .map(|set| set.contains(gno))
            .unwrap_or(false)
    }

    /// `other`의 모든 트랜잭션이 이 집합에 포함되는지
    pub fn contains_set(&self, other: &GtidSet) -> bool {
        other.sets.iter().all(|(uuid, other_set)| {
            if other_set.ranges.is_empty() {
                return true;
            }
            match self.sets.get(uuid) {
                Some(set) => other_set.ranges.iter().all(|r| set.contains_range(r)),
                None => false,
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.sets.values().all(|set| set.ranges.is_empty())
    }

    pub fn uuid_infos(&self) -> Vec<UuidInfo> {
        self.sets
            .values()
            .filter_map(|set| {
                Some(UuidInfo {
                    uuid: set.uuid.clone(),
                    min_transaction: set.min_transaction()?,
                    max_transaction: set.max_transaction()?,
                    total_count: set.total_count(),
                })
            })
            .collect()
    }

    /// 가장 큰 트랜잭션 번호를 가진 UUID (멀티 마스터 환경에서 현재 마스터로 간주)
    pub fn active_master_uuid(&self) -> Result<String> {
        self.uuid_infos()
            .into_iter()
            .max_by_key(|info| info.max_transaction)
            .map(|info| info.uuid)
            .ok_or_else(|| SearchError::GtidError("No UUIDs found in GTID set".to_string()))
    }

    /// 지정한 UUID만 남긴 새 집합
    pub fn filter_by_uuid(&self, uuid: &str) -> Result<GtidSet> {
        let uuid = normalize_uuid(uuid)?;
        let set = self.sets.get(&uuid).ok_or_else(|| {
            SearchError::GtidError(format!("UUID {} not found in GTID set", uuid))
        })?;

        let mut filtered = GtidSet::new();
        filtered.sets.insert(uuid, set.clone());
        Ok(filtered)
    }
}

impl fmt::Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .sets
            .values()
            .filter(|set| !set.ranges.is_empty())
            .map(|set| format!("{}:{}", set.uuid, set.ranges_to_string()))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

/// UUID를 소문자 하이픈 형식으로 정규화
pub fn normalize_uuid(uuid: &str) -> Result<String> {
    Uuid::parse_str(uuid.trim())
        .map(|u| u.hyphenated().to_string())
        .map_err(|e| SearchError::GtidError(format!("Invalid UUID '{}': {}", uuid, e)))
}

fn split_gtid(gtid: &str) -> Result<(&str, u64)> {
    let (uuid, sequence) = gtid
        .trim()
        .split_once(':')
        .ok_or_else(|| SearchError::GtidError(format!("Invalid GTID format: {}", gtid)))?;
    let sequence = sequence
        .parse::<u64>()
        .map_err(|_| SearchError::GtidError(format!("Invalid sequence: {}", sequence)))?;
    Ok((uuid, sequence))
}

fn parse_interval(interval: &str) -> Result<GtidRange> {
    static INTERVAL: OnceLock<Regex> = OnceLock::new();
    let re = INTERVAL.get_or_init(|| Regex::new(r"^(\d+)(?:-(\d+))?$").expect("valid regex"));

    let caps = re
        .captures(interval)
        .ok_or_else(|| SearchError::GtidError(format!("Invalid interval: {}", interval)))?;

    let parse = |s: &str| {
        s.parse::<u64>()
            .map_err(|_| SearchError::GtidError(format!("Invalid interval: {}", interval)))
    };

    let start = parse(&caps[1])?;
    let end = match caps.get(2) {
        Some(m) => parse(m.as_str())?,
        None => start,
    };
    GtidRange::new(start, end)
}
