pub mod http;
pub mod subsystems;

#[cfg(test)]
pub(crate) mod testing;
