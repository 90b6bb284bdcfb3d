/// Formats and records a diagnostic message, skipping the formatting entirely when the logger
/// is disabled.
///
/// The first argument must coerce to `&dyn Logger`.
///
/// ```rust, ignore
///  log!(ctx.logger, "Found the GOTO for the continue: {}", label);
/// ```
macro_rules! log {
    ($logger:expr, $($arg:tt)*) => {{
        let logger: &dyn crate::logger::Logger = $logger;
        if crate::logger::Logger::enabled(logger) {
            crate::logger::Logger::log(logger, &format!($($arg)*));
        }
    }};
}
