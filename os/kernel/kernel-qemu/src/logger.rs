use crate::ByteSink;
use crate::line::LineBuffer;
use core::fmt::Write;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Returns the logical id of the executing core, if it already has one.
pub type CoreIdSource = fn() -> Option<usize>;

const LINE_CAPACITY: usize = 256;

pub struct QemuLogger<S> {
    max_level: LevelFilter,
    sink: S,
    core_id: CoreIdSource,
}

impl<S: ByteSink> QemuLogger<S> {
    #[must_use]
    pub const fn new(max_level: LevelFilter, sink: S, core_id: CoreIdSource) -> Self {
        Self {
            max_level,
            sink,
            core_id,
        }
    }

    /// Installs the logger. Call this once during early init.
    ///
    /// # Errors
    /// Fails if another logger was installed first.
    pub fn init(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }

    pub const fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: ByteSink> Log for QemuLogger<S> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Best effort: a formatting error still emits what was written.
        let mut line = LineBuffer::<LINE_CAPACITY>::new();
        let _ = match (self.core_id)() {
            Some(core) => write!(
                line,
                "[{}] core {core} {}: {}",
                record.level(),
                record.target(),
                record.args()
            ),
            None => write!(line, "[{}] {}: {}", record.level(), record.target(), record.args()),
        };
        self.sink.write_bytes(line.finish());
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use std::sync::Mutex;

    struct Capture(Mutex<Vec<u8>>);

    impl ByteSink for Capture {
        fn write_bytes(&self, bytes: &[u8]) {
            self.0.lock().unwrap().extend_from_slice(bytes);
        }
    }

    fn emit(logger: &QemuLogger<Capture>, level: Level, msg: &str) {
        logger.log(
            &Record::builder()
                .level(level)
                .target("kernel_smp::boot")
                .args(format_args!("{msg}"))
                .build(),
        );
    }

    fn captured(logger: &QemuLogger<Capture>) -> String {
        String::from_utf8(logger.sink().0.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn lines_are_tagged_with_the_core() {
        let logger =
            QemuLogger::new(LevelFilter::Debug, Capture(Mutex::new(Vec::new())), || Some(3));
        emit(&logger, Level::Info, "Number of cores detected: 4");
        assert_eq!(
            captured(&logger),
            "[INFO] core 3 kernel_smp::boot: Number of cores detected: 4\n"
        );
    }

    #[test]
    fn unknown_core_omits_the_tag_and_levels_filter() {
        let logger = QemuLogger::new(LevelFilter::Info, Capture(Mutex::new(Vec::new())), || None);
        emit(&logger, Level::Debug, "dropped");
        emit(&logger, Level::Warn, "kept");
        assert_eq!(captured(&logger), "[WARN] kernel_smp::boot: kept\n");
    }
}
