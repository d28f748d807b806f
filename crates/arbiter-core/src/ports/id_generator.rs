//! IdGenerator port - DecisionId の生成
//!
//! registry は decision を作るたびに ID を払い出します。remote protocol の
//! key になるため、プロセス内で一意であれば十分です。

use crate::domain::ids::DecisionId;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は DecisionId を生成
///
/// registry は単一スレッドで使う前提なので、スレッド境界は要求しません。
pub trait IdGenerator {
    fn generate_decision_id(&self) -> DecisionId;
}

/// ULID ベースの ID 生成器
///
/// timestamp 部分は Clock から取るので、FixedClock を渡すと
/// timestamp が固定された ID になります（ランダム部分は毎回異なる）。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_decision_id(&self) -> DecisionId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        DecisionId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}
