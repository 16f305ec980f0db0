//! Launching external tools
//!
//! Every process the driver starts goes through a `ToolRunner`:
//! - `invoke` for fire-and-forget tools; a non-zero exit is an error
//! - `invoke_capture` for tools whose output the caller interprets
//!
//! Both echo the exact command line in verbose mode.

use std::env;
use std::ffi::OsStr;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

use tracing::debug;

use crate::error::{CompileError, CompileResult};

/// A single external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Bytes written to the child's stdin
    pub stdin: Option<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Name of the executable without its directory
    pub fn tool_name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or(&self.program)
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn status_text(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit status: {}", code),
            None => "terminated by signal".to_string(),
        }
    }

    /// Turn a non-zero exit into `ToolFailed` naming `command`
    pub fn check(self, command: &ToolCommand) -> CompileResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(CompileError::ToolFailed {
                command: command.to_string(),
                status: self.status_text(),
                stderr: self.stderr,
            })
        }
    }
}

/// Runs external commands on behalf of the driver
pub trait ToolRunner: Sync {
    /// Run a command whose failure ends the build
    fn invoke(&self, command: &ToolCommand) -> CompileResult<()>;

    /// Run a command and hand back its output, whatever its exit status
    fn invoke_capture(&self, command: &ToolCommand) -> CompileResult<ToolOutput>;
}

/// Runs commands as real child processes
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    verbose: bool,
}

impl SystemRunner {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    fn announce(&self, command: &ToolCommand) {
        if self.verbose {
            println!("{}", command);
        }
        debug!(tool = command.tool_name(), command = %command, "invoking");
    }

    fn build(command: &ToolCommand) -> Command {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        cmd
    }
}

impl ToolRunner for SystemRunner {
    fn invoke(&self, command: &ToolCommand) -> CompileResult<()> {
        self.announce(command);
        let mut cmd = Self::build(command);
        if command.stdin.is_some() {
            // Inherited output, piped input.
            cmd.stdin(Stdio::piped());
        }
        let mut child = cmd.spawn().map_err(|source| CompileError::Spawn {
            command: command.to_string(),
            source,
        })?;
        if let Some(input) = &command.stdin {
            feed_stdin(&mut child, input, command)?;
        }
        let status = child.wait().map_err(|source| CompileError::Spawn {
            command: command.to_string(),
            source,
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(CompileError::ToolFailed {
                command: command.to_string(),
                status: status_text(status),
                stderr: String::new(),
            })
        }
    }

    fn invoke_capture(&self, command: &ToolCommand) -> CompileResult<ToolOutput> {
        self.announce(command);
        let mut cmd = Self::build(command);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if command.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|source| CompileError::Spawn {
            command: command.to_string(),
            source,
        })?;

        // Large modules would fill the pipe before the child starts writing
        // its own output, so stdin is fed from a separate thread.
        let writer = match (command.stdin.clone(), child.stdin.take()) {
            (Some(input), Some(mut pipe)) => Some(thread::spawn(move || {
                pipe.write_all(input.as_bytes())
            })),
            _ => None,
        };

        let output = child.wait_with_output().map_err(|source| CompileError::Spawn {
            command: command.to_string(),
            source,
        })?;

        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                // A child that exits early closes the pipe; its exit status
                // says more than the broken pipe does.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(source)) => {
                    return Err(CompileError::Spawn {
                        command: command.to_string(),
                        source,
                    })
                }
                Err(_) => {
                    return Err(CompileError::Spawn {
                        command: command.to_string(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::Other,
                            "stdin writer panicked",
                        ),
                    })
                }
            }
        }

        let result = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };
        debug!(tool = command.tool_name(), exit_code = ?result.exit_code, "finished");
        Ok(result)
    }
}

fn feed_stdin(
    child: &mut std::process::Child,
    input: &str,
    command: &ToolCommand,
) -> CompileResult<()> {
    if let Some(mut pipe) = child.stdin.take() {
        match pipe.write_all(input.as_bytes()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Err(source) => {
                return Err(CompileError::Spawn {
                    command: command.to_string(),
                    source,
                })
            }
        }
    }
    Ok(())
}

fn status_text(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit status: {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Locate an executable on `PATH`
pub fn find_tool(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|full| is_executable(full))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Tools the driver needs, resolved once before any stage runs
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub air_opt: String,
    pub air_translate: String,
    pub aie_translate: String,
    pub opt: String,
    pub llvm_dis: String,
    pub clang: String,
    pub llvm_ar: String,
    pub aiecc: String,
    /// Compiler for the generated wrapper sources
    pub cc: String,
    /// Install prefix of `aiecc.py`, the root of its `runtime_lib`
    pub aiecc_root: PathBuf,
}

impl Toolchain {
    /// Resolve every required tool on `PATH`
    pub fn discover(cc: &str, needs_archiver: bool) -> CompileResult<Self> {
        let require = |name: &str| -> CompileResult<String> {
            find_tool(name)
                .map(|path| path.display().to_string())
                .ok_or_else(|| CompileError::tool_not_found(name))
        };

        let aiecc_path = find_tool("aiecc.py").ok_or_else(|| CompileError::tool_not_found("aiecc.py"))?;
        let aiecc_root = aiecc_root(&aiecc_path)?;
        debug!(root = %aiecc_root.display(), "using aiecc.py");

        let llvm_ar = if needs_archiver {
            require("llvm-ar")?
        } else {
            "llvm-ar".to_string()
        };

        Ok(Self {
            air_opt: require("air-opt")?,
            air_translate: require("air-translate")?,
            aie_translate: require("aie-translate")?,
            opt: require("opt")?,
            llvm_dis: require("llvm-dis")?,
            clang: require("clang")?,
            llvm_ar,
            aiecc: aiecc_path.display().to_string(),
            cc: require(cc)?,
            aiecc_root,
        })
    }

    /// Tool names resolved through `PATH` at launch time
    #[cfg(test)]
    pub(crate) fn from_path(cc: &str, aiecc_root: impl Into<PathBuf>) -> Self {
        Self {
            air_opt: "air-opt".to_string(),
            air_translate: "air-translate".to_string(),
            aie_translate: "aie-translate".to_string(),
            opt: "opt".to_string(),
            llvm_dis: "llvm-dis".to_string(),
            clang: "clang".to_string(),
            llvm_ar: "llvm-ar".to_string(),
            aiecc: "aiecc.py".to_string(),
            cc: cc.to_string(),
            aiecc_root: aiecc_root.into(),
        }
    }
}

/// `<dir of the real aiecc.py>/..`
fn aiecc_root(aiecc_path: &Path) -> CompileResult<PathBuf> {
    let real = aiecc_path
        .canonicalize()
        .map_err(|e| CompileError::io(aiecc_path, e))?;
    let bin_dir = real
        .parent()
        .ok_or_else(|| CompileError::config("aiecc.py has no parent directory"))?;
    Ok(bin_dir.join(".."))
}
