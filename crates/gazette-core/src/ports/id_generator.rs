//! IdGenerator port - 公開 ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（Clock の時刻 + ランダム部）

use crate::domain::PublicJobId;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は job の公開 ID を生成
///
/// 内部 ID（JobId）は JobStore が採番するので、ここでは扱わない。
pub trait IdGenerator: Send + Sync {
    fn generate_public_id(&self) -> PublicJobId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock を使って timestamp 部を決めるので、FixedClock と組み合わせると
/// テストで時刻部分を固定できる。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_public_id(&self) -> PublicJobId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        PublicJobId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}
