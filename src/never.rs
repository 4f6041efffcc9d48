/// Success type for loops that only ever return an error, such as the accept loop.
///
/// Rust's `!` is unstable in this position, so this empty enum stands in for it.
#[derive(Debug)]
pub enum Never {}
