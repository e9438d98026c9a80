//! Log macros routed to the active backend.
//!
//! | Feature  | Backend                          |
//! |----------|----------------------------------|
//! | `defmt`  | `defmt::{debug,info,warn,error}` |
//! | `std`    | `tracing::{debug,info,warn,error}` |
//! | neither  | arguments borrowed, nothing printed |
//!
//! Format strings stay within the `{}` subset both backends accept, and
//! arguments are primitives or `&str` so they implement both `defmt::Format`
//! and `Display`.

macro_rules! route {
    ($level:ident, $($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::$level!($($arg)*);
        #[cfg(all(feature = "std", not(feature = "defmt")))]
        tracing::$level!($($arg)*);
        #[cfg(not(any(feature = "defmt", feature = "std")))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}

macro_rules! debug {
    ($($arg:tt)*) => { route!(debug, $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { route!(info, $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { route!(warn, $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { route!(error, $($arg)*) };
}
