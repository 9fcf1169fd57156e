use ssacfg::*;

use std::path::PathBuf;

use clap::Parser;

/// Translate SSA-form modules into control-flow graphs
#[derive(Parser, Debug)]
#[clap(about, version, author)]
enum Args {
    /// Translate a textual SSA module (`.ll`)
    Translate {
        /// Path to the module to translate
        module: PathBuf,
        /// Path to dump the translated CFGs of every routine to
        #[clap(long)]
        dump_cfg: Option<PathBuf>,
        /// Output each translated CFG as a GraphViz `.dot` file, named after its routine, into the
        /// given directory
        #[clap(long)]
        debug_output_graphviz: Option<PathBuf>,
        /// Disable terminal logging, even for high severity alerts. Strongly discouraged for normal
        /// use.
        #[clap(long)]
        debug_disable_terminal_logging: bool,
        /// Force blocking for terminal logging. If too many messages are being spewed the logger,
        /// by default, does not block, but instead dumps a dropped-messages alert. This option
        /// forces it to block and dump even if too many are being sent.
        #[clap(long)]
        debug_forced_blocking_terminal_logging: bool,
        /// Path to send log (as JSON) to
        ///
        /// Error or higher severity alerts will still continue being shown at stderr (in addition
        /// to being added to the log)
        #[clap(long = "--log")]
        log_file: Option<PathBuf>,
        /// Debug level (repeat for more: 0-warn, 1-info, 2-debug, 3-trace)
        #[clap(short, long, parse(from_occurrences))]
        debug: usize,
        /// Advanced configuration options to tweak the translation behavior
        #[clap(short = 'Z', long, arg_enum)]
        advanced_config: Vec<translation_config::CommandLineTranslationConfig>,
    },
}

fn main() {
    let args = Args::parse();

    match args {
        Args::Translate {
            module,
            dump_cfg,
            debug_output_graphviz,
            debug_disable_terminal_logging,
            debug_forced_blocking_terminal_logging,
            log_file,
            debug,
            advanced_config,
        } => {
            let logger = match crate::log::FileAndTermDrain::new(
                debug,
                debug_disable_terminal_logging,
                debug_forced_blocking_terminal_logging,
                log_file,
            ) {
                Ok(logger) => logger,
                Err(e) => {
                    eprintln!("Could not set up logging: {}", e);
                    std::process::exit(2);
                }
            };
            let _log_guard = slog_scope::set_global_logger(logger);

            translation_config::TranslationConfig::initialize(advanced_config);

            if let Err(e) = run(module, dump_cfg, debug_output_graphviz) {
                log::crit!("Translation failed"; "error" => %e);
                std::process::exit(1);
            }

            log::trace!("Done");
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("could not access `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Reader(#[from] errors::ReaderError),
    #[error(transparent)]
    Translation(#[from] errors::TranslationError),
}

fn io_error(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> CliError + '_ {
    move |source| CliError::Io {
        path: path.to_owned(),
        source,
    }
}

fn run(
    module_path: PathBuf,
    dump_cfg: Option<PathBuf>,
    debug_output_graphviz: Option<PathBuf>,
) -> Result<(), CliError> {
    use std::io::Write;

    let text = std::fs::read_to_string(&module_path).map_err(io_error(&module_path))?;
    let module = ir_reader::read_module(&text)?;
    let lifter = types::StandardTypeLifter::for_module(&module);
    let translation = module_translator::ModuleTranslator::new(&lifter).translate(&module)?;

    if let Some(path) = dump_cfg {
        let mut f = std::fs::File::create(&path).map_err(io_error(&path))?;
        for cfg in translation.cfg_map().values() {
            writeln!(f, "{:?}", cfg).map_err(io_error(&path))?;
        }
    }

    if let Some(dir) = debug_output_graphviz {
        std::fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        for cfg in translation.cfg_map().values() {
            let path = dir.join(format!("{}.dot", cfg.sanitized_name()));
            let mut f = std::fs::File::create(&path).map_err(io_error(&path))?;
            cfg.write_dot(&mut f).map_err(io_error(&path))?;
        }
    }

    for (symbol, cfg) in translation.cfg_map().iter() {
        println!(
            "{}: {} blocks, {} registers",
            symbol,
            cfg.blocks.len(),
            cfg.registers.len()
        );
    }
    let initialized = translation
        .global_init_map()
        .values()
        .filter(|g| g.value.is_some())
        .count();
    println!(
        "{} globals ({} with constant initializers), {} handles",
        translation.global_init_map().len(),
        initialized,
        translation.handles().len()
    );
    Ok(())
}
