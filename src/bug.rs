/// Like `panic!`, but marks a broken internal invariant of the table walker
/// rather than bad input from the caller.
#[macro_export]
macro_rules! bug {
    ($($arg:tt)*) => (panic!("mmu64 bug: {}", format_args!($($arg)*)));
}
