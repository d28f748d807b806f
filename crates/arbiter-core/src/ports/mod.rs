//! Ports - 抽象化レイヤー
//!
//! 各 trait は decision engine と外部（時刻、ID、回答者）との境界を定義し、
//! 実装の詳細を隠蔽します。

pub mod answer_source;
pub mod clock;
pub mod frontend;
pub mod id_generator;

pub use self::answer_source::AnswerSource;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::frontend::{
    BatchAnswer, Frontend, MetaCommand, Presentation, PromptContext, RawAnswer, Resolution,
};
pub use self::id_generator::{IdGenerator, UlidGenerator};
