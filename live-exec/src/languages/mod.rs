//! Toolchain table: one row per supported language.
//!
//! Adding a language means adding a [`LanguageSpec`] to [`LANGUAGES`] and a
//! variant to [`Language`]; the dispatcher has no per-language branches.

use std::path::Path;
use which::which;

use crate::types::Language;

/// Output of the native compilers, relative to the workspace
pub const NATIVE_ARTIFACT: &str = ".live-exec-bin";

/// Executable of a command template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Program {
    /// Looked up on `PATH`
    Tool(&'static str),
    /// The compile step's output artifact
    Artifact,
}

/// One argument of a command template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg {
    Lit(&'static str),
    /// Workspace-relative entry file name
    Entry,
    /// Every submitted file matching the language's extensions, expands to zero or more args
    Sources,
    /// Absolute path of the compile artifact
    Artifact,
    /// Fully qualified class chosen by the entry-point resolver
    MainClass,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandTemplate {
    pub program: Program,
    pub args: &'static [Arg],
}

#[derive(Debug, Clone, Copy)]
pub struct CompileTemplate {
    pub command: CommandTemplate,
    /// Artifact path relative to the workspace; `.` is the workspace itself
    pub artifact: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct LanguageSpec {
    pub language: Language,
    /// Extensions selecting compilation units
    pub extensions: &'static [&'static str],
    pub compile: Option<CompileTemplate>,
    pub run: CommandTemplate,
    /// Run the entry-point resolver after compiling
    pub resolve_entry_point: bool,
}

const fn interpreted(
    language: Language,
    extensions: &'static [&'static str],
    tool: &'static str,
    args: &'static [Arg],
) -> LanguageSpec {
    LanguageSpec {
        language,
        extensions,
        compile: None,
        run: CommandTemplate {
            program: Program::Tool(tool),
            args,
        },
        resolve_entry_point: false,
    }
}

const fn native(
    language: Language,
    extensions: &'static [&'static str],
    compiler: &'static str,
    args: &'static [Arg],
) -> LanguageSpec {
    LanguageSpec {
        language,
        extensions,
        compile: Some(CompileTemplate {
            command: CommandTemplate {
                program: Program::Tool(compiler),
                args,
            },
            artifact: NATIVE_ARTIFACT,
        }),
        run: CommandTemplate {
            program: Program::Artifact,
            args: &[],
        },
        resolve_entry_point: false,
    }
}

pub const LANGUAGES: &[LanguageSpec] = &[
    interpreted(
        Language::Python,
        &["py"],
        "python3",
        &[Arg::Lit("-u"), Arg::Entry],
    ),
    interpreted(
        Language::JavaScript,
        &["js", "mjs", "cjs"],
        "node",
        &[Arg::Entry],
    ),
    interpreted(
        Language::TypeScript,
        &["ts"],
        "ts-node",
        &[Arg::Lit("--transpile-only"), Arg::Entry],
    ),
    interpreted(Language::Php, &["php"], "php", &[Arg::Entry]),
    interpreted(Language::Ruby, &["rb"], "ruby", &[Arg::Entry]),
    interpreted(Language::Bash, &["sh"], "bash", &[Arg::Entry]),
    native(
        Language::C,
        &["c"],
        "gcc",
        &[
            Arg::Lit("-O2"),
            Arg::Lit("-o"),
            Arg::Artifact,
            Arg::Sources,
            Arg::Lit("-lm"),
        ],
    ),
    native(
        Language::Cpp,
        &["cpp", "cc", "cxx"],
        "g++",
        &[
            Arg::Lit("-O2"),
            Arg::Lit("-std=c++17"),
            Arg::Lit("-o"),
            Arg::Artifact,
            Arg::Sources,
        ],
    ),
    native(
        Language::Go,
        &["go"],
        "go",
        &[Arg::Lit("build"), Arg::Lit("-o"), Arg::Artifact, Arg::Sources],
    ),
    native(
        Language::Rust,
        &["rs"],
        "rustc",
        &[Arg::Lit("-O"), Arg::Lit("-o"), Arg::Artifact, Arg::Entry],
    ),
    LanguageSpec {
        language: Language::Java,
        extensions: &["java"],
        compile: Some(CompileTemplate {
            command: CommandTemplate {
                program: Program::Tool("javac"),
                args: &[Arg::Lit("-d"), Arg::Artifact, Arg::Sources],
            },
            artifact: ".",
        }),
        run: CommandTemplate {
            program: Program::Tool("java"),
            args: &[Arg::Lit("-cp"), Arg::Artifact, Arg::MainClass],
        },
        resolve_entry_point: true,
    },
];

impl LanguageSpec {
    pub fn of(language: Language) -> Option<&'static LanguageSpec> {
        LANGUAGES.iter().find(|spec| spec.language == language)
    }

    pub fn matches(&self, file_name: &str) -> bool {
        Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext))
    }

    /// Executables this language needs on `PATH`
    pub fn required_tools(&self) -> Vec<&'static str> {
        let mut tools = Vec::new();
        for template in self.compile.iter().map(|c| &c.command).chain([&self.run]) {
            if let Program::Tool(tool) = template.program {
                tools.push(tool);
            }
        }
        tools
    }

    pub fn missing_tools(&self) -> Vec<&'static str> {
        self.required_tools()
            .into_iter()
            .filter(|tool| !check_command(tool))
            .collect()
    }
}

/// Languages whose whole toolchain is installed on this host
pub fn available_languages() -> Vec<Language> {
    LANGUAGES
        .iter()
        .filter(|spec| spec.missing_tools().is_empty())
        .map(|spec| spec.language)
        .collect()
}

pub(crate) fn check_command(cmd: &str) -> bool {
    which(cmd).is_ok()
}

#[cfg(test)]
pub(crate) fn skip_if_not_available(tools: &[&str]) -> bool {
    let missing: Vec<_> = tools
        .iter()
        .filter(|tool| which(**tool).is_err())
        .map(|s| (*s).to_string())
        .collect();

    if !missing.is_empty() {
        eprintln!("Skipping test: {} not available", missing.join(", "));
        return true;
    }
    false
}
