//! Domain model (ids, decision kinds, answers, errors).

pub mod answer;
pub mod decision;
pub mod errors;
pub mod ids;
pub mod kind;
pub mod status;
pub mod units;

pub use self::answer::Answer;
pub use self::decision::{AnswerCheck, Decision, DecisionSpec, OutputTarget, Validator};
pub use self::errors::{DecisionError, ErrorKind, ParseError};
pub use self::ids::{DecisionId, IdParseError};
pub use self::kind::{BodyRow, ChoiceItem, DecisionKind, KindTag};
pub use self::status::DecisionStatus;
pub use self::units::{Quantity, Unit, UnknownUnit};
