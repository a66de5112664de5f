use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};
use which::which;

use crate::{
    error::Error,
    languages::{Arg, CommandTemplate, LanguageSpec, Program},
    resolver::{EntryPointResolver, Introspector, Javap, NO_ENTRY_POINT_MESSAGE},
    types::Language,
};

/// Build command that must succeed before the program runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileStep {
    pub program: String,
    pub args: Vec<String>,
    /// Path the compiler writes its output to
    pub artifact: PathBuf,
}

/// Command that starts the user's program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStep {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub compile: Option<CompileStep>,
    pub run: RunStep,
}

/// Values substituted into a command template
struct TemplateContext<'a> {
    workspace: &'a Path,
    entry: &'a str,
    sources: &'a [String],
    artifact: Option<&'a Path>,
    main_class: Option<&'a str>,
}

impl TemplateContext<'_> {
    fn render(&self, template: &CommandTemplate) -> Result<(String, Vec<String>), Error> {
        let program = match template.program {
            Program::Tool(tool) => tool.to_string(),
            Program::Artifact => self.artifact()?,
        };

        let mut args = Vec::with_capacity(template.args.len());
        for arg in template.args {
            match arg {
                Arg::Lit(value) => args.push(value.to_string()),
                Arg::Entry => args.push(self.entry.to_string()),
                Arg::Sources => args.extend(self.sources.iter().cloned()),
                Arg::Artifact => args.push(self.artifact()?),
                Arg::MainClass => args.push(
                    self.main_class
                        .ok_or_else(|| Error::Resolution(NO_ENTRY_POINT_MESSAGE.to_string()))?
                        .to_string(),
                ),
            }
        }
        Ok((program, args))
    }

    fn artifact(&self) -> Result<String, Error> {
        self.artifact
            .map(|path| path.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::Toolchain(format!(
                    "No build artifact available in {}",
                    self.workspace.display()
                ))
            })
    }
}

fn artifact_path(workspace: &Path, relative: &str) -> PathBuf {
    if relative == "." {
        workspace.to_path_buf()
    } else {
        workspace.join(relative)
    }
}

/// Table row plus the file selection it implies for one workspace
struct Layout<'a> {
    spec: &'static LanguageSpec,
    workspace: &'a Path,
    entry: &'a str,
    sources: Vec<String>,
    artifact: Option<PathBuf>,
}

impl<'a> Layout<'a> {
    fn new(
        language: Language,
        workspace: &'a Path,
        files: &[String],
        entry: &'a str,
    ) -> Result<Self, Error> {
        let spec = LanguageSpec::of(language)
            .ok_or_else(|| Error::Protocol(format!("Unsupported language: {}", language)))?;

        if !files.iter().any(|name| name == entry) {
            return Err(Error::Workspace(format!("Entry file not found: {}", entry)));
        }

        let sources: Vec<String> = files
            .iter()
            .filter(|name| spec.matches(name))
            .cloned()
            .collect();
        if spec.compile.is_some() && sources.is_empty() {
            return Err(Error::Workspace(format!(
                "No .{} source files submitted",
                spec.extensions.join(", .")
            )));
        }

        let artifact = spec
            .compile
            .as_ref()
            .map(|compile| artifact_path(workspace, compile.artifact));

        Ok(Self {
            spec,
            workspace,
            entry,
            sources,
            artifact,
        })
    }

    fn context<'b>(&'b self, main_class: Option<&'b str>) -> TemplateContext<'b> {
        TemplateContext {
            workspace: self.workspace,
            entry: self.entry,
            sources: &self.sources,
            artifact: self.artifact.as_deref(),
            main_class,
        }
    }

    fn compile_step(&self) -> Result<Option<CompileStep>, Error> {
        match (&self.spec.compile, &self.artifact) {
            (Some(template), Some(artifact)) => {
                let (program, args) = self.context(None).render(&template.command)?;
                Ok(Some(CompileStep {
                    program,
                    args,
                    artifact: artifact.clone(),
                }))
            }
            _ => Ok(None),
        }
    }

    fn run_step(&self, main_class: Option<&str>) -> Result<RunStep, Error> {
        let (program, args) = self.context(main_class).render(&self.spec.run)?;
        Ok(RunStep {
            program,
            args,
            cwd: self.workspace.to_path_buf(),
        })
    }
}

/// Turns a language tag and a materialized workspace into a runnable plan
pub struct Dispatcher<I = Javap> {
    resolver: EntryPointResolver<I>,
}

impl Dispatcher<Javap> {
    pub fn with_javap(tool: impl Into<String>) -> Self {
        Self::new(EntryPointResolver::with_javap(tool))
    }
}

impl<I: Introspector> Dispatcher<I> {
    pub fn new(resolver: EntryPointResolver<I>) -> Self {
        Self { resolver }
    }

    /// Render both steps without running anything.
    ///
    /// Languages that resolve their entry point need `main_class` here.
    pub fn plan(
        &self,
        language: Language,
        workspace: &Path,
        files: &[String],
        entry: &str,
        main_class: Option<&str>,
    ) -> Result<ExecutionPlan, Error> {
        let layout = Layout::new(language, workspace, files, entry)?;
        Ok(ExecutionPlan {
            compile: layout.compile_step()?,
            run: layout.run_step(main_class)?,
        })
    }

    /// Compile (blocking until the compiler exits), resolve the entry point
    /// where the language needs one, and return the final plan.
    pub async fn prepare(
        &self,
        language: Language,
        workspace: &Path,
        files: &[String],
        entry: &str,
    ) -> Result<ExecutionPlan, Error> {
        let layout = Layout::new(language, workspace, files, entry)?;
        let compile_step = layout.compile_step()?;

        if let Some(step) = &compile_step {
            compile(step, workspace).await?;
        }

        let main_class = if layout.spec.resolve_entry_point {
            let class = self
                .resolver
                .resolve(workspace, entry, files)
                .await
                .ok_or_else(|| Error::Resolution(NO_ENTRY_POINT_MESSAGE.to_string()))?;
            info!("Resolved entry point {}", class);
            Some(class)
        } else {
            None
        };

        Ok(ExecutionPlan {
            compile: compile_step,
            run: layout.run_step(main_class.as_deref())?,
        })
    }
}

/// Run a compile step, surfacing the compiler's diagnostics verbatim on failure.
async fn compile(step: &CompileStep, workspace: &Path) -> Result<(), Error> {
    let compiler = which(&step.program)
        .map_err(|_| Error::Toolchain(format!("Compiler not found: {}", step.program)))?;

    debug!("Compile - Command: {} {:?}", step.program, step.args);

    let output = Command::new(compiler)
        .args(&step.args)
        .current_dir(workspace)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::Toolchain(format!("Failed to run {}: {}", step.program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostics = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).into_owned()
        } else {
            stderr.into_owned()
        };
        if diagnostics.trim().is_empty() {
            return Err(Error::Toolchain(format!(
                "{} exited with {}",
                step.program, output.status
            )));
        }
        return Err(Error::Toolchain(diagnostics));
    }

    Ok(())
}
