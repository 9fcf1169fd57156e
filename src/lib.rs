pub mod block_translator;
pub mod cfg;
pub mod containers;
pub mod debug_metadata;
pub mod errors;
pub mod handle_registry;
pub mod ir;
pub mod ir_reader;
pub mod module_translator;
pub mod register_types;
pub mod routine_translator;
pub mod source_location;
pub mod structuring;
pub mod tests;
pub mod translation_config;
pub mod types;

pub mod log {
    pub use slog_scope::{crit, debug, error, info, trace, warn};

    pub struct OptionalKV<V: slog::Value>(pub &'static str, pub Option<V>);
    impl<V: slog::Value> slog::KV for OptionalKV<V> {
        fn serialize(
            &self,
            record: &slog::Record,
            serializer: &mut dyn slog::Serializer,
        ) -> slog::Result {
            if let Some(v) = &self.1 {
                v.serialize(record, self.0, serializer)
            } else {
                Ok(())
            }
        }
    }

    /// Sends records both to the terminal and, when a path is given, to a JSON log file. With a
    /// log file, only errors reach the terminal.
    pub struct FileAndTermDrain {
        file_drain: Option<slog::Logger>,
        term_drain: slog::Logger,
    }
    impl FileAndTermDrain {
        pub fn new(
            debug_level: usize,
            disable_terminal_logging: bool,
            force_block: bool,
            path: Option<std::path::PathBuf>,
        ) -> Result<slog::Logger, sloggers::Error> {
            use sloggers::types::{Format, OverflowStrategy, Severity};
            use sloggers::Build;

            let debug_level = match debug_level {
                0 => Severity::Warning,
                1 => Severity::Info,
                2 => Severity::Debug,
                _ => Severity::Trace,
            };

            let term_drain = if disable_terminal_logging {
                sloggers::null::NullLoggerBuilder.build()?
            } else {
                sloggers::terminal::TerminalLoggerBuilder::new()
                    .destination(sloggers::terminal::Destination::Stderr)
                    .level(if path.is_none() {
                        debug_level
                    } else {
                        Severity::Error
                    })
                    .overflow_strategy(if force_block || path.is_none() {
                        OverflowStrategy::Block
                    } else {
                        OverflowStrategy::DropAndReport
                    })
                    .format(Format::Compact)
                    .build()?
            };

            let file_drain = path
                .map(|path| {
                    sloggers::file::FileLoggerBuilder::new(path)
                        .truncate()
                        .level(debug_level)
                        .overflow_strategy(OverflowStrategy::Block)
                        .format(Format::Json)
                        .build()
                })
                .transpose()?;

            Ok(slog::Logger::root(
                Self {
                    file_drain,
                    term_drain,
                },
                slog::o!(),
            ))
        }
    }
    impl slog::Drain for FileAndTermDrain {
        type Ok = ();
        type Err = slog::Never;
        fn log(
            &self,
            r: &slog::Record<'_>,
            kv: &slog::OwnedKVList,
        ) -> Result<<Self as slog::Drain>::Ok, <Self as slog::Drain>::Err> {
            if let Some(f) = &self.file_drain {
                <slog::Logger as slog::Drain>::log(f, r, kv)?;
            }
            <slog::Logger as slog::Drain>::log(&self.term_drain, r, kv)?;
            Ok(())
        }
    }
}
