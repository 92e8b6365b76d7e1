use std::panic;
use std::sync::Once;

static INIT: Once = Once::new();

/// Install env_logger and a panic hook that records the panic, with a
/// captured backtrace, through the log facade before the default hook runs.
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("info"),
        )
        .try_init();

        let default_hook = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let message = info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
                .unwrap_or("<non-string panic payload>");
            match info.location() {
                Some(loc) => log::error!(
                    "panic at {}:{}: {}\n{:?}",
                    loc.file(),
                    loc.line(),
                    message,
                    backtrace::Backtrace::new()
                ),
                None => {
                    log::error!("panic: {}\n{:?}", message, backtrace::Backtrace::new())
                }
            }
            default_hook(info);
        }));

        log::debug!("logging initialized");
    });
}
