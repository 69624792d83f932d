//! Worker executable resolution
//!
//! The bridge only needs something that yields a [`WorkerCommand`] before a
//! session starts; how that command is found (bundled asset, dev layout,
//! PATH) lives behind the [`WorkerLocator`] trait. A PATH-and-common-dirs
//! implementation is provided for the usual interpreter-plus-script layout.

use std::path::PathBuf;

use crate::supervisor::WorkerCommand;
use crate::{Error, Result};

/// Resolves the worker's launch command before the bridge starts.
pub trait WorkerLocator: Send + Sync {
    fn locate(&self) -> Result<WorkerCommand>;
}

/// Locator wrapping an already-resolved command.
pub struct FixedCommand(pub WorkerCommand);

impl WorkerLocator for FixedCommand {
    fn locate(&self) -> Result<WorkerCommand> {
        Ok(self.0.clone())
    }
}

/// Finds `program` in PATH, then in the usual per-user and system install
/// directories. When a `script` is set it becomes the single argument, the
/// interpreter-plus-server-script layout.
pub struct SearchPathLocator {
    program: String,
    script: Option<PathBuf>,
    cwd: Option<PathBuf>,
}

impl SearchPathLocator {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            script: None,
            cwd: None,
        }
    }

    pub fn with_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    fn find_program(&self) -> Result<PathBuf> {
        if let Ok(path) = which::which(&self.program) {
            return Ok(path);
        }

        let home = dirs::home_dir()
            .ok_or_else(|| Error::Spawn("Cannot find home directory".to_string()))?;

        let common_paths = [
            home.join(".local/bin").join(&self.program),
            home.join(".cargo/bin").join(&self.program),
            PathBuf::from("/usr/local/bin").join(&self.program),
            PathBuf::from("/opt/homebrew/bin").join(&self.program),
        ];

        for path in &common_paths {
            if path.exists() {
                return Ok(path.clone());
            }
        }

        Err(Error::Spawn(format!(
            "'{}' not found in PATH or common install locations",
            self.program
        )))
    }
}

impl WorkerLocator for SearchPathLocator {
    fn locate(&self) -> Result<WorkerCommand> {
        let program = self.find_program()?;

        let mut args = Vec::new();
        if let Some(script) = &self.script {
            if !script.exists() {
                return Err(Error::Spawn(format!(
                    "Worker script not found: {}",
                    script.display()
                )));
            }
            args.push(script.to_string_lossy().into_owned());
        }

        Ok(WorkerCommand {
            program,
            args,
            cwd: self.cwd.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_command_passes_through() {
        let command = WorkerCommand {
            program: PathBuf::from("/usr/bin/python3"),
            args: vec!["server.py".to_string()],
            cwd: None,
        };
        let located = FixedCommand(command.clone()).locate().unwrap();
        assert_eq!(located.program, command.program);
        assert_eq!(located.args, command.args);
    }

    #[test]
    fn test_program_resolved_from_path() {
        // `sh` exists on any unix test host.
        let located = SearchPathLocator::new("sh").locate().unwrap();
        assert!(located.program.is_absolute());
        assert!(located.args.is_empty());
    }

    #[test]
    fn test_unknown_program_is_spawn_error() {
        let err = SearchPathLocator::new("definitely-not-a-real-program-xyz")
            .locate()
            .unwrap_err();
        assert!(matches!(err, Error::Spawn(_)));
    }

    #[test]
    fn test_existing_script_becomes_single_argument() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("worker.py");
        std::fs::write(&script, "print('hi')\n").unwrap();

        let located = SearchPathLocator::new("sh")
            .with_script(&script)
            .with_cwd(dir.path())
            .locate()
            .unwrap();

        assert_eq!(located.args, vec![script.to_string_lossy().into_owned()]);
        assert_eq!(located.cwd.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_missing_script_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = SearchPathLocator::new("sh")
            .with_script(dir.path().join("absent.py"))
            .locate()
            .unwrap_err();

        match err {
            Error::Spawn(message) => assert!(message.contains("absent.py")),
            other => panic!("expected spawn error, got {:?}", other),
        }
    }
}
