//! Operation logging macros
//!
//! `log_op_start!` and `log_op_end!` log at info. `log_op_error!` converts
//! its error into an [`ExError`](crate::errors::ExError) and logs at error
//! with the stable code, plus the failing address when the error names one.

/// ```
/// # use bincore_core::log_op_start;
/// log_op_start!("task.run", task_id = 7u64);
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr $(, $($field:tt)*)?) => {{
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::bincore_core_types::schema::EVENT_START,
            $($($field)*)?
        );
    }};
}

/// ```
/// # use bincore_core::log_op_end;
/// log_op_end!("pending.flush", duration_ms = 3, applied = 2usize);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {{
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::bincore_core_types::schema::EVENT_END,
            duration_ms = $duration,
            $($($field)*)?
        );
    }};
}

/// ```
/// # use bincore_core::{log_op_error, errors::BincoreError};
/// let err = BincoreError::FunctionNotFound { address: 0x1000 };
/// log_op_error!("task.run", err, duration_ms = 10, task_id = 3u64);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {{
        let ex_err: $crate::errors::ExError = $err.into();
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::bincore_core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.kind = ?ex_err.kind(),
            err.code = ex_err.code(),
            err.address = ex_err.address(),
            err.message = ex_err.message(),
            $($($field)*)?
        );
    }};
}
