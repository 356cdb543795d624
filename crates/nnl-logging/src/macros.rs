//! ---
//! nnl_section: "03-logging"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Structured lifecycle logging adapters."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
//! Level-specific logging macros enriched with a [`LogContext`](crate::LogContext).

#[doc(hidden)]
#[macro_export]
macro_rules! __nnl_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::__tracing::event!(
            $level,
            node = ctx.node.unwrap_or(""),
            action = ctx.action.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with lifecycle context.
#[macro_export]
macro_rules! nnl_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__nnl_event!($crate::__tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__nnl_event!($crate::__tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with lifecycle context.
#[macro_export]
macro_rules! nnl_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__nnl_event!($crate::__tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__nnl_event!($crate::__tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with lifecycle context.
#[macro_export]
macro_rules! nnl_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__nnl_event!($crate::__tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__nnl_event!($crate::__tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}
