//! Back-end dispatch macro.
//!
//! Pools and checked-out connections are both enums with one variant per
//! back end. `impl_db_dispatch!` writes the match over either of them.

/// Generate match arms over a per-back-end enum from `db::pool`.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(DbPool, pool, {
///     MySql(p) => p.num_idle(),
///     Postgres(p) => p.num_idle(),
///     SQLite(p) => p.num_idle(),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($kind:ident, $value:expr, { $($variant:ident($p:pat) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $crate::db::pool::$kind::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
