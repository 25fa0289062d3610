pub mod cmd;
pub mod docker;
pub mod error;
pub mod progress;
pub mod scan;

#[cfg(test)]
mod test_support;
