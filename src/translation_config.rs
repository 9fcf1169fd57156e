//! A global store of flags that can impact translation.
//!
//! WARNING: Currently only supports a single consistent configuration amongst threads (i.e., cannot
//! have different configurations for different translations in the same process through
//! [`CONFIG`](static@CONFIG)). Library users who need that pass a [`TranslationConfig`] explicitly
//! to [`translate_module_with_config`](crate::module_translator::translate_module_with_config).

/// The configuration store. Its fields are expected to be accessed across the program via the
/// global [`CONFIG`](static@CONFIG), unless explicitly provided.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslationConfig {
    /// Reject a repeated declaration of a symbol whose lifted signature differs from the one
    /// already registered. If `false`, the first registration silently wins.
    pub validate_redeclared_signatures: bool,
    /// Update the source position from `!dbg` attachments while lowering. If `false`, every
    /// statement is lowered at the internal position.
    pub track_source_locations: bool,
    /// Carry variable annotations backwards through pointer reinterpretations (`bitcast`,
    /// `addrspacecast`) onto the allocation they reinterpret.
    pub propagate_debug_through_casts: bool,
    /// Emit an `Annotate` statement after each allocation that carries variable annotations.
    pub emit_variable_annotations: bool,
    /// Whether to print each routine's lowered blocks, before structuring (useful when debugging)
    pub debug_print_lowered_blocks: bool,
}

impl TranslationConfig {
    /// Internal method: sets up initialization
    #[allow(static_mut_refs)]
    fn from_initialized() -> Self {
        // SAFETY: only touched from `initialize` and here, both before any concurrent access to
        // `CONFIG` can happen
        let init = unsafe { INTERNAL_CONFIG_INITIALIZER.take() };
        init.flatten().unwrap_or_default()
    }

    /// Initialize with the given command line configuration. Should only be called once, and should
    /// only be called from `main`, before any translation starts.
    #[allow(static_mut_refs)]
    pub fn initialize(command_line_config: Vec<CommandLineTranslationConfig>) {
        let prev = unsafe { INTERNAL_CONFIG_INITIALIZER.replace(Some(command_line_config.into())) };
        assert!(prev.is_some(), "Performed double initialization");
        lazy_static::initialize(&CONFIG);
    }
}

/// Internal initialization detail.
static mut INTERNAL_CONFIG_INITIALIZER: Option<Option<TranslationConfig>> = Some(None);

lazy_static::lazy_static! {
    /// The global configuration store. Falls back to the defaults if never initialized.
    pub static ref CONFIG: TranslationConfig = TranslationConfig::from_initialized();
}

#[derive(clap::ArgEnum, Clone, Debug)]
/// Translation configuration parameters
pub enum CommandLineTranslationConfig {
    EnableRedeclarationValidation,
    DisableSourceLocationTracking,
    DisableDebugPropagationThroughCasts,
    DisableVariableAnnotations,
    EnableDebugPrintLoweredBlocks,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        TranslationConfig {
            validate_redeclared_signatures: false,
            track_source_locations: true,
            propagate_debug_through_casts: true,
            emit_variable_annotations: true,
            debug_print_lowered_blocks: false,
        }
    }
}

impl From<Vec<CommandLineTranslationConfig>> for TranslationConfig {
    fn from(v: Vec<CommandLineTranslationConfig>) -> Self {
        use CommandLineTranslationConfig::*;
        let mut r = TranslationConfig::default();
        for v in v {
            match v {
                EnableRedeclarationValidation => {
                    r.validate_redeclared_signatures = true;
                }
                DisableSourceLocationTracking => {
                    r.track_source_locations = false;
                }
                DisableDebugPropagationThroughCasts => {
                    r.propagate_debug_through_casts = false;
                }
                DisableVariableAnnotations => {
                    r.emit_variable_annotations = false;
                }
                EnableDebugPrintLoweredBlocks => {
                    r.debug_print_lowered_blocks = true;
                }
            }
        }
        r
    }
}
