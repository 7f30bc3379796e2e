// Candidate discovery: which pairs are worth scanning this cycle
pub mod ranking;

pub use ranking::{is_tradable_pair, rank_candidates, RankingFilter};
