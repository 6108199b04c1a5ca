//! 트랜잭션 경계 추적기
//!
//! 이벤트 스트림 하나를 순서대로 소비하면서 대상 GTID 집합에 속한 트랜잭션의
//! 시작/커밋 위치와 다음 트랜잭션 위치(재시작 지점)를 계산합니다.
//!
//! 상태(현재 데이터베이스, 진행 중 트랜잭션, 최선의 결과)는 한 번의 스캔이
//! 독점하며 다른 스캔과 공유하지 않습니다.

use crate::error::Result;
use crate::events::{BinlogEvent, BinlogEventData, GtidEventData};
use crate::gtid::GtidSet;
use crate::offset::GtidPosition;
use crate::source::EventSource;
use chrono::Utc;
use tracing::{debug, trace};

/// 스캔 조건 (데이터베이스, 시간 범위)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    /// 이 스키마에서 시작된 트랜잭션만 대상
    pub database: Option<String>,
    /// 이 시각(유닉스 초) 이전 이벤트는 건너뜀
    pub start_time: Option<u32>,
    /// 이 시각(유닉스 초) 이후 이벤트를 만나면 스캔 종료
    pub end_time: Option<u32>,
}

/// 조기 종료 사유 (에러가 아님)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 결과 이후의 첫 GTID를 찾음 - 답이 확정됨
    NextGtidFound,
    /// 종료 시각을 넘는 이벤트에 도달
    EndTimeReached,
}

/// 이벤트 하나를 처리한 뒤의 제어 흐름
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Stop(StopReason),
}

/// 스캔 하나의 결과
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    pub position: Option<GtidPosition>,
    /// `None`이면 스트림 끝까지 읽음
    pub stopped: Option<StopReason>,
    pub events: u64,
}

pub struct TransactionTracker {
    target: GtidSet,
    filter: ScanFilter,
    follow_rotations: bool,
    current_file: String,
    current_database: String,
    in_flight: Option<GtidPosition>,
    best: Option<GtidPosition>,
}

impl TransactionTracker {
    pub fn new(target: GtidSet, filter: ScanFilter, binlog_file: impl Into<String>) -> Self {
        TransactionTracker {
            target,
            filter,
            follow_rotations: false,
            current_file: binlog_file.into(),
            current_database: String::new(),
            in_flight: None,
            best: None,
        }
    }

    /// ROTATE 이벤트로 결과에 붙는 파일명을 갱신 (복제 스트림용)
    pub fn follow_rotations(mut self) -> Self {
        self.follow_rotations = true;
        self
    }

    pub fn current_file(&self) -> &str {
        &self.current_file
    }

    pub fn finish(self) -> Option<GtidPosition> {
        self.best
    }

    pub fn process(&mut self, event: &BinlogEvent) -> Step {
        let header = &event.header;

        if self.follow_rotations {
            if let BinlogEventData::Rotate(rotate) = &event.data {
                debug!("Rotated to: {}", rotate.next_binlog_name);
                self.current_file = rotate.next_binlog_name.clone();
                return Step::Continue;
            }
        }

        if let Some(start) = self.filter.start_time {
            if header.timestamp < start {
                return Step::Continue;
            }
        }
        if let Some(end) = self.filter.end_time {
            if header.timestamp > end {
                return Step::Stop(StopReason::EndTimeReached);
            }
        }

        if let BinlogEventData::Query(query) = &event.data {
            if !query.database.is_empty() {
                self.current_database = query.database.clone();
            }
        }

        if let BinlogEventData::Gtid(gtid) = &event.data {
            if let Step::Stop(reason) = self.on_gtid(event, gtid) {
                return Step::Stop(reason);
            }
        }

        let is_commit = match &event.data {
            BinlogEventData::Xid(_) => true,
            BinlogEventData::Query(query) => query.is_commit(),
            _ => false,
        };
        if is_commit {
            self.on_commit(event);
        }

        Step::Continue
    }

    fn on_gtid(&mut self, event: &BinlogEvent, gtid: &GtidEventData) -> Step {
        let header = &event.header;

        // 읽을 수 없는 GTID는 건너뜀
        let Ok(single) = GtidSet::single(&gtid.server_uuid, gtid.gno) else {
            trace!("Skipping unreadable GTID {}:{}", gtid.server_uuid, gtid.gno);
            return Step::Continue;
        };

        if self.target.contains_set(&single) {
            if let Some(database) = &self.filter.database {
                if &self.current_database != database {
                    self.in_flight = None;
                    return Step::Continue;
                }
            }

            self.in_flight = Some(GtidPosition {
                binlog_file: self.current_file.clone(),
                position: header.start_pos(),
                commit_position: header.next_pos,
                resume_position: header.next_pos,
                timestamp: header.timestamp,
                gtid: gtid.gtid(),
                server_uuid: gtid.server_uuid.clone(),
                gno: gtid.gno,
                database: self.current_database.clone(),
                next_gtid: None,
                created_at: Utc::now(),
            });
            return Step::Continue;
        }

        if let Some(best) = self.best.as_mut() {
            if best.next_gtid.is_none() {
                best.next_gtid = Some(gtid.gtid());
                best.resume_position = header.next_pos;
                return Step::Stop(StopReason::NextGtidFound);
            }
        }

        self.in_flight = None;
        Step::Continue
    }

    fn on_commit(&mut self, event: &BinlogEvent) {
        let Some(mut transaction) = self.in_flight.take() else {
            return;
        };

        transaction.binlog_file = self.current_file.clone();
        transaction.commit_position = event.header.next_pos;
        transaction.resume_position = event.header.next_pos;
        transaction.timestamp = event.header.timestamp;

        let better = match &self.best {
            Some(best) => transaction.gno > best.gno,
            None => true,
        };
        if better {
            trace!(
                "Committed match {} at {}",
                transaction.gtid,
                transaction.commit_position
            );
            self.best = Some(transaction);
        }
    }

    /// 소스를 끝까지(또는 조기 종료까지) 읽고 결과를 반환
    pub fn scan<S: EventSource + ?Sized>(mut self, source: &mut S) -> Result<ScanOutcome> {
        let mut events = 0u64;
        let mut stopped = None;

        while let Some(event) = source.next_event()? {
            events += 1;
            if let Step::Stop(reason) = self.process(&event) {
                stopped = Some(reason);
                break;
            }
        }

        Ok(ScanOutcome {
            position: self.finish(),
            stopped,
            events,
        })
    }
}
