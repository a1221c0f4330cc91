//! Program descriptors and the registry the supervisor spawns from
//!
//! The registry is an ordered list populated from static configuration.
//! Entries are never removed; only their tracked pid changes as programs
//! are spawned, reaped and relaunched.

use nix::unistd::Pid;
use serde::Deserialize;
use std::path::PathBuf;

/// What a launched program gets as its standard output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdoutMode {
    /// Inherited stdout is closed before the program image starts
    #[default]
    Closed,
    /// Redirected to `/dev/null`
    Null,
    /// Shares the supervisor's stdout
    Inherit,
}

/// Static description of a program to supervise
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProgramSpec {
    pub path: PathBuf,

    #[serde(default)]
    pub args: Vec<String>,

    /// Relaunch the program whenever it terminates
    #[serde(default)]
    pub watched: bool,

    #[serde(default)]
    pub stdout: StdoutMode,
}

impl ProgramSpec {
    pub fn new<P, I, S>(path: P, args: I, watched: bool) -> Self
    where
        P: Into<PathBuf>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into(),
            args: args.into_iter().map(Into::into).collect(),
            watched,
            stdout: StdoutMode::default(),
        }
    }

    #[must_use]
    pub fn with_stdout(mut self, stdout: StdoutMode) -> Self {
        self.stdout = stdout;
        self
    }
}

/// The compiled-in program table used when configuration names none
pub fn builtin_programs() -> Vec<ProgramSpec> {
    vec![
        ProgramSpec::new("./server", ["9999"], true),
        ProgramSpec::new("./client", ["9999"], true),
    ]
}

/// A registry entry: a `ProgramSpec` plus its live state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramDescriptor {
    /// Pid of the running instance, `None` when not running
    pub pid: Option<Pid>,
    pub path: PathBuf,
    pub args: Vec<String>,
    pub watched: bool,
    pub stdout: StdoutMode,
    /// Number of relaunches performed after a watched termination
    pub restarts: u32,
}

impl From<&ProgramSpec> for ProgramDescriptor {
    fn from(spec: &ProgramSpec) -> Self {
        Self {
            pid: None,
            path: spec.path.clone(),
            args: spec.args.clone(),
            watched: spec.watched,
            stdout: spec.stdout,
            restarts: 0,
        }
    }
}

impl ProgramDescriptor {
    pub fn is_running(&self) -> bool {
        self.pid.is_some()
    }
}

/// Ordered list of supervised programs
#[derive(Debug, Clone, Default)]
pub struct Registry {
    programs: Vec<ProgramDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear and repopulate from `specs`, with every pid unset
    pub fn prepare(&mut self, specs: &[ProgramSpec]) {
        self.programs.clear();
        self.programs.extend(specs.iter().map(ProgramDescriptor::from));
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProgramDescriptor> {
        self.programs.iter()
    }

    pub fn get(&self, index: usize) -> Option<&ProgramDescriptor> {
        self.programs.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ProgramDescriptor> {
        self.programs.get_mut(index)
    }

    /// Index of the entry currently tracking `pid`
    pub fn position_of(&self, pid: Pid) -> Option<usize> {
        self.programs.iter().position(|p| p.pid == Some(pid))
    }

    /// Pids of every entry that is currently running
    pub fn tracked_pids(&self) -> Vec<Pid> {
        self.programs.iter().filter_map(|p| p.pid).collect()
    }
}

impl<'a> IntoIterator for &'a Registry {
    type Item = &'a ProgramDescriptor;
    type IntoIter = std::slice::Iter<'a, ProgramDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_resets_pids() {
        let mut registry = Registry::new();
        registry.prepare(&[ProgramSpec::new("/bin/sleep", ["5"], true)]);
        registry.get_mut(0).unwrap().pid = Some(Pid::from_raw(4242));

        registry.prepare(&[
            ProgramSpec::new("/bin/sleep", ["5"], true),
            ProgramSpec::new("/bin/echo", ["hi"], false),
        ]);

        assert_eq!(registry.len(), 2);
        assert!(registry.iter().all(|p| p.pid.is_none()));
        assert_eq!(registry.get(1).unwrap().args, vec!["hi".to_string()]);
    }

    #[test]
    fn test_position_of() {
        let mut registry = Registry::new();
        registry.prepare(&builtin_programs());
        registry.get_mut(1).unwrap().pid = Some(Pid::from_raw(77));

        assert_eq!(registry.position_of(Pid::from_raw(77)), Some(1));
        assert_eq!(registry.position_of(Pid::from_raw(78)), None);
        assert_eq!(registry.tracked_pids(), vec![Pid::from_raw(77)]);
    }

    #[test]
    fn test_builtin_programs_are_watched() {
        let programs = builtin_programs();
        assert_eq!(programs.len(), 2);
        assert!(programs.iter().all(|p| p.watched));
        assert_eq!(programs[0].stdout, StdoutMode::Closed);
    }
}
