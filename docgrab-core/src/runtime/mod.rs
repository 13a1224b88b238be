pub mod admission;
pub mod coordinator;
pub mod extractor;
pub mod storage;
pub mod types;

#[cfg(test)]
mod tests;
