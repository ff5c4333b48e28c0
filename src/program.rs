//! Programs a controller can run
//!
//! A `Program` hands the controller its parsed modules; the first module is
//! the main module unless the configuration names another one.
//!
//! # Example
//!
//! ```rust,ignore
//! use synchro_core::program::ScriptProgram;
//!
//! let program = ScriptProgram::new()
//!     .with_source("blink", "activity Main() { run SetMainLED(\"red\") }");
//! let modules = program.modules()?;
//! ```

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::executor::Module;
use crate::parser::semantic_validator::{validate_module, ValidationError};
use crate::parser::{parse_module, ParseError};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("module '{module}': {error}")]
    Parse { module: String, error: ParseError },

    #[error("module '{module}' failed validation: {}", summarize(.errors))]
    Invalid {
        module: String,
        errors: Vec<ValidationError>,
    },

    #[error("program has no modules")]
    Empty,
}

fn summarize(errors: &[ValidationError]) -> String {
    match errors {
        [] => "no errors".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{} (and {} more)", first, rest.len()),
    }
}

/// Something a controller can run
pub trait Program: Send + Sync {
    /// Parsed modules; the first one is the main module
    fn modules(&self) -> Result<Vec<Module>, LoadError>;

    /// Text logged when the program starts; defaults to the main module docs
    fn explanation(&self) -> Option<String> {
        None
    }
}

impl<F> Program for F
where
    F: Fn() -> Result<Vec<Module>, LoadError> + Send + Sync,
{
    fn modules(&self) -> Result<Vec<Module>, LoadError> {
        self()
    }
}

/* ===================== Script Programs ===================== */

/// One module's source text
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Module name used when the source has no `module` header
    pub name: String,
    pub source: String,
    pub path: Option<PathBuf>,
}

/// Program made of module source texts
#[derive(Debug, Clone, Default)]
pub struct ScriptProgram {
    files: Vec<SourceFile>,
    explanation: Option<String>,
}

impl ScriptProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.files.push(SourceFile {
            name: name.into(),
            source: source.into(),
            path: None,
        });
        self
    }

    /// Override the explanation taken from the main module docs
    pub fn with_explanation(mut self, text: impl Into<String>) -> Self {
        self.explanation = Some(text.into());
        self
    }

    /// Read module files; each file's stem is its default module name
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, LoadError> {
        let mut program = Self::new();
        for path in paths {
            let path = path.as_ref();
            let source = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "main".to_string());
            program.files.push(SourceFile {
                name,
                source,
                path: Some(path.to_path_buf()),
            });
        }
        Ok(program)
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    /// SHA-256 over every module name and source, in order
    pub fn version_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for file in &self.files {
            hasher.update(file.name.as_bytes());
            hasher.update([0]);
            hasher.update(file.source.as_bytes());
            hasher.update([0]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Parse and validate one file; warnings are returned alongside the module
    pub fn load_file(file: &SourceFile) -> Result<(Module, Vec<ValidationError>), LoadError> {
        let module = parse_module(&file.source, &file.name).map_err(|error| LoadError::Parse {
            module: file.name.clone(),
            error,
        })?;
        let (errors, warnings): (Vec<_>, Vec<_>) = validate_module(&module, &file.source)
            .into_iter()
            .partition(|e| e.is_error());
        if !errors.is_empty() {
            return Err(LoadError::Invalid {
                module: module.name,
                errors,
            });
        }
        Ok((module, warnings))
    }
}

impl Program for ScriptProgram {
    fn modules(&self) -> Result<Vec<Module>, LoadError> {
        if self.files.is_empty() {
            return Err(LoadError::Empty);
        }
        let mut modules = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let (module, warnings) = Self::load_file(file)?;
            for warning in warnings {
                tracing::warn!(module = %module.name, "{}", warning);
            }
            modules.push(module);
        }
        let version = self.version_hash();
        tracing::debug!(
            modules = modules.len(),
            version = &version[..8],
            "loaded program"
        );
        Ok(modules)
    }

    fn explanation(&self) -> Option<String> {
        self.explanation.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modules_keep_order_and_header_names() {
        let program = ScriptProgram::new()
            .with_source("first", "module drive\nactivity Main() { halt }")
            .with_source("second", "activity Helper() { halt }");
        let modules = program.modules().unwrap();
        let names: Vec<_> = modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["drive", "second"]);
    }

    #[test]
    fn test_parse_and_validation_errors() {
        let program = ScriptProgram::new().with_source("main", "activity Main( {");
        assert!(matches!(
            program.modules(),
            Err(LoadError::Parse { ref module, .. }) if module == "main"
        ));

        let program = ScriptProgram::new().with_source("main", "activity Main() { await (nope) }");
        let err = program.modules().unwrap_err();
        assert!(matches!(err, LoadError::Invalid { ref errors, .. } if errors.len() == 1));
        assert!(err.to_string().contains("nope"));

        assert!(matches!(ScriptProgram::new().modules(), Err(LoadError::Empty)));
    }

    #[test]
    fn test_warnings_do_not_block_loading() {
        let program =
            ScriptProgram::new().with_source("main", "activity Main() { var unused = 1; halt }");
        assert_eq!(program.modules().unwrap().len(), 1);
    }

    #[test]
    fn test_version_hash_tracks_sources() {
        let a = ScriptProgram::new().with_source("main", "activity Main() { halt }");
        let b = ScriptProgram::new().with_source("main", "activity Main() { halt }");
        let c = ScriptProgram::new().with_source("main", "activity Main() { }");
        assert_eq!(a.version_hash(), b.version_hash());
        assert_ne!(a.version_hash(), c.version_hash());
        assert_eq!(a.version_hash().len(), 64);
    }

    #[test]
    fn test_from_files_uses_stem() {
        let dir = std::env::temp_dir().join(format!("synchro-program-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("lights.syncs");
        std::fs::write(&path, "activity Main() { halt }").unwrap();

        let program = ScriptProgram::from_files(&[&path]).unwrap();
        assert_eq!(program.files()[0].name, "lights");
        assert_eq!(program.modules().unwrap()[0].name, "lights");

        let missing = ScriptProgram::from_files(&[dir.join("missing.syncs")]);
        assert!(matches!(missing, Err(LoadError::Io { .. })));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_closure_program() {
        let program = || -> Result<Vec<Module>, LoadError> {
            Ok(vec![parse_module("activity Main() { halt }", "inline").unwrap()])
        };
        assert_eq!(program.modules().unwrap()[0].name, "inline");
        assert_eq!(program.explanation(), None);
    }
}
