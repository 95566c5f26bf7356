pub mod data;
pub mod io;

#[cfg(test)]
pub mod tests;
