pub mod explanation;
pub mod recommendation;
pub mod training;
pub mod vector_db;
pub mod votes;
