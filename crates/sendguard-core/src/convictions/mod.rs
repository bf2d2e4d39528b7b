//! Precedent memory.
//!
//! A conviction is an agent's recorded verdict ("will act" / "won't act")
//! in a given situation. Agents recall similar past situations before acting
//! and may be held back by confident `Wont` precedent.

mod model;
mod similarity;
mod store;

pub use model::{Conviction, ConvictionStats, RecallSynthesis, ScoredConviction, Verdict};
pub use similarity::{similarity, synthesize};
pub use store::ConvictionStore;
