use log::{self, Level, LevelFilter, Metadata, Record};

struct SimpleLogger;

impl log::Log for SimpleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31,
            Level::Warn => 93,
            Level::Info => 34,
            Level::Debug => 32,
            Level::Trace => 90,
        };
        eprintln!(
            "\x1b[{}m[{:>5}] {}\x1b[0m",
            color,
            record.level(),
            record.args()
        );
    }

    fn flush(&self) {}
}

fn level_from(value: Option<&str>) -> LevelFilter {
    match value {
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        Some("INFO") => LevelFilter::Info,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// 安装控制台日志, 级别取自环境变量 `LOG`, 默认 INFO
///
/// 重复调用时保留第一次安装的日志器
pub fn init() {
    static LOGGER: SimpleLogger = SimpleLogger;
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level_from(std::env::var("LOG").ok().as_deref()));
    }
}
