//! Question answering that keeps working offline.

mod corpus;
mod resolver;
mod similarity;

pub use corpus::{keyword_answer, Corpus, QaEntry, FUZZY_THRESHOLD, KEYWORD_ANSWERS};
pub use resolver::{Answer, AnswerResolver, AnswerSource, OnlineFetcher, ANSWER_CACHE_PREFIX, NO_ANSWER};
pub use similarity::similarity;
