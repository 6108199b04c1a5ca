//! 이벤트 소스 추상화
//!
//! 트래커는 이벤트가 파일에서 오는지 메모리에서 오는지 알 필요가 없습니다.
//! 코디네이터와 파일 선택기는 `EventSourceFactory`를 통해 파일을 열기 때문에
//! 테스트에서는 메모리 이벤트 시퀀스로 대체할 수 있습니다.

use crate::binlog::BinlogFileReader;
use crate::error::Result;
use crate::events::BinlogEvent;
use std::path::Path;

/// 순서가 보장된 디코딩된 이벤트 시퀀스
///
/// `Ok(None)`은 스트림의 정상 종료, `Err`는 전송/디코딩 실패입니다.
pub trait EventSource: Send {
    fn next_event(&mut self) -> Result<Option<BinlogEvent>>;
}

impl<S: EventSource + ?Sized> EventSource for Box<S> {
    fn next_event(&mut self) -> Result<Option<BinlogEvent>> {
        (**self).next_event()
    }
}

/// 파일 경로로부터 이벤트 소스를 생성
pub trait EventSourceFactory: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn EventSource>>;
}

/// 로컬 binlog 파일용 기본 팩토리
#[derive(Debug, Clone, Copy, Default)]
pub struct BinlogFileOpener;

impl EventSourceFactory for BinlogFileOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn EventSource>> {
        Ok(Box::new(BinlogFileReader::open(path)?))
    }
}
