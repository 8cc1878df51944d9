pub mod cache;
pub mod clustering;
pub mod features;
pub mod normalize;
pub mod schema;
pub mod significant;
#[cfg(feature = "cache")]
pub mod storage;
pub mod string_distance;
pub mod tfidf;
pub mod tokenizer;
