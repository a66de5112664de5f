//! Heuristic entry-point discovery for compiled Java sources.
//!
//! Callers submit a set of `.java` files without saying which class holds
//! `main`. After compilation this module guesses one, in two steps:
//!
//! 1. Enumerate candidate class names, ranked by origin: types declared in
//!    the entry file, then types declared in the other sources, then every
//!    `.class` file under the workspace (nested `Outer$Inner` artifacts
//!    skipped).
//! 2. Ask an [`Introspector`] about each candidate in order. The first one
//!    confirmed runnable wins. If the tool itself is missing, probing stops.
//!
//! When nothing is confirmed, a purely textual scan looks for the `main`
//! signature and attributes it to the nearest preceding type declaration.
//!
//! This is pattern matching, not parsing. Known blind spots:
//!
//! - signatures split across lines in unusual ways, annotations between the
//!   modifiers, or `java.lang.String` spelled out are not recognised;
//! - `class`/`record`/`enum` keywords and `main` signatures inside comments
//!   or string literals are matched as if they were code;
//! - nested types are attributed by position only, so `main` declared in an
//!   outer class after an inner class body is credited to the inner class;
//! - source-derived names of nested types are not binary names
//!   (`Inner` rather than `Outer$Inner`) and simply fail probing.

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::{fs, process::Command};
use tracing::{debug, warn};
use which::which;

/// Extension of compilable sources
pub const SOURCE_EXTENSION: &str = "java";
/// Extension of compiled artifacts
pub const ARTIFACT_EXTENSION: &str = "class";
/// Marks compiler-generated nested and anonymous classes
const NESTING_MARKER: char = '$';

pub const NO_ENTRY_POINT_MESSAGE: &str =
    "No runnable class found. Declare a class with: public static void main(String[] args)";

fn package_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*package\s+([A-Za-z_$][\w$]*(?:\s*\.\s*[A-Za-z_$][\w$]*)*)\s*;")
            .unwrap()
    })
}

fn type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:class|record|enum)\s+([A-Za-z_$][\w$]*)").unwrap())
}

fn main_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:public\s+static|static\s+public)\s+void\s+main\s*\(\s*(?:final\s+)?String\s*(?:\[\s*\]\s*[A-Za-z_$][\w$]*|\.\.\.\s*[A-Za-z_$][\w$]*|[A-Za-z_$][\w$]*\s*\[\s*\])\s*\)",
        )
        .unwrap()
    })
}

/// Where a candidate name came from, in descending priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CandidateOrigin {
    EntryFile,
    OtherSource,
    Artifact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Fully qualified class name
    pub name: String,
    pub origin: CandidateOrigin,
}

/// Answer of an introspection probe for one class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Runnable,
    NotRunnable,
    /// The introspection tool cannot be run at all
    Unavailable,
}

/// Authoritative check of whether a compiled class exposes `main`
#[async_trait]
pub trait Introspector: Send + Sync {
    async fn probe(&self, classpath: &Path, class_name: &str) -> ProbeOutcome;
}

/// Probes classes with the JDK's `javap`
#[derive(Debug, Clone)]
pub struct Javap {
    tool: String,
}

impl Javap {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }
}

impl Default for Javap {
    fn default() -> Self {
        Self::new("javap")
    }
}

#[async_trait]
impl Introspector for Javap {
    async fn probe(&self, classpath: &Path, class_name: &str) -> ProbeOutcome {
        let tool = match which(&self.tool) {
            Ok(path) => path,
            Err(_) => return ProbeOutcome::Unavailable,
        };

        let output = match Command::new(tool)
            .arg("-cp")
            .arg(classpath)
            .arg("-public")
            .arg(class_name)
            .current_dir(classpath)
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ProbeOutcome::Unavailable
            }
            Err(e) => {
                warn!("{} failed for {}: {}", self.tool, class_name, e);
                return ProbeOutcome::NotRunnable;
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.code() == Some(127) || stderr.contains("command not found") {
            return ProbeOutcome::Unavailable;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains("public static void main(java.lang.String[])")
            || stdout.contains("public static void main(java.lang.String...)")
        {
            ProbeOutcome::Runnable
        } else {
            ProbeOutcome::NotRunnable
        }
    }
}

/// Declarations found in one source file
#[derive(Debug, Default)]
struct SourceScan {
    package: Option<String>,
    types: Vec<String>,
    /// Type credited with the first `main` signature in the file
    main_type: Option<String>,
}

impl SourceScan {
    fn parse(source: &str) -> Self {
        let package = package_re().captures(source).map(|caps| {
            caps[1]
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
        });

        let declarations: Vec<(usize, String)> = type_re()
            .captures_iter(source)
            .filter_map(|caps| caps.get(1).map(|m| (m.start(), m.as_str().to_string())))
            .collect();

        let main_type = main_re().find(source).and_then(|signature| {
            declarations
                .iter()
                .take_while(|(offset, _)| *offset < signature.start())
                .last()
                .map(|(_, name)| name.clone())
        });

        Self {
            package,
            types: declarations.into_iter().map(|(_, name)| name).collect(),
            main_type,
        }
    }

    fn qualify(&self, name: &str) -> String {
        match &self.package {
            Some(package) => format!("{}.{}", package, name),
            None => name.to_string(),
        }
    }
}

pub struct EntryPointResolver<I = Javap> {
    introspector: I,
}

impl EntryPointResolver<Javap> {
    pub fn with_javap(tool: impl Into<String>) -> Self {
        Self::new(Javap::new(tool))
    }
}

impl<I: Introspector> EntryPointResolver<I> {
    pub fn new(introspector: I) -> Self {
        Self { introspector }
    }

    /// Pick the class to run after a successful compile into `workspace_dir`.
    ///
    /// `source_files` are workspace-relative names in submission order.
    pub async fn resolve(
        &self,
        workspace_dir: &Path,
        entry_file: &str,
        source_files: &[String],
    ) -> Option<String> {
        let scans = scan_sources(workspace_dir, entry_file, source_files).await;
        let candidates = enumerate_candidates(workspace_dir, &scans).await;
        debug!(
            "Entry point candidates: {:?}",
            candidates.iter().map(|c| &c.name).collect::<Vec<_>>()
        );

        for candidate in &candidates {
            match self.introspector.probe(workspace_dir, &candidate.name).await {
                ProbeOutcome::Runnable => {
                    debug!("Confirmed runnable class {}", candidate.name);
                    return Some(candidate.name.clone());
                }
                ProbeOutcome::NotRunnable => continue,
                ProbeOutcome::Unavailable => {
                    debug!("Introspection unavailable, using textual scan");
                    break;
                }
            }
        }

        let eligible: HashSet<String> = scans
            .iter()
            .filter_map(|(_, scan)| scan.main_type.as_ref().map(|name| scan.qualify(name)))
            .filter(|name| !name.contains(NESTING_MARKER))
            .collect();

        candidates
            .into_iter()
            .find(|candidate| eligible.contains(&candidate.name))
            .map(|candidate| candidate.name)
    }
}

/// Read and scan the `.java` sources, entry file first.
async fn scan_sources(
    workspace_dir: &Path,
    entry_file: &str,
    source_files: &[String],
) -> Vec<(CandidateOrigin, SourceScan)> {
    let mut ordered: Vec<(CandidateOrigin, &str)> = Vec::new();
    if has_extension(entry_file, SOURCE_EXTENSION) {
        ordered.push((CandidateOrigin::EntryFile, entry_file));
    }
    ordered.extend(
        source_files
            .iter()
            .filter(|name| name.as_str() != entry_file)
            .filter(|name| has_extension(name, SOURCE_EXTENSION))
            .map(|name| (CandidateOrigin::OtherSource, name.as_str())),
    );

    let mut scans = Vec::with_capacity(ordered.len());
    for (origin, name) in ordered {
        match fs::read_to_string(workspace_dir.join(name)).await {
            Ok(source) => scans.push((origin, SourceScan::parse(&source))),
            Err(e) => warn!("Skipping unreadable source {}: {}", name, e),
        }
    }
    scans
}

async fn enumerate_candidates(
    workspace_dir: &Path,
    scans: &[(CandidateOrigin, SourceScan)],
) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    let compiled = compiled_classes(workspace_dir)
        .await
        .into_iter()
        .map(|name| (CandidateOrigin::Artifact, name));
    let declared = scans
        .iter()
        .flat_map(|(origin, scan)| scan.types.iter().map(move |t| (*origin, scan.qualify(t))));

    for (origin, name) in declared.chain(compiled) {
        if seen.insert(name.clone()) {
            candidates.push(Candidate { name, origin });
        }
    }
    candidates
}

/// Binary names of every non-nested `.class` file under `root`, sorted.
async fn compiled_classes(root: &Path) -> Vec<String> {
    let mut classes = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read {}: {}", dir.display(), e);
                continue;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                pending.push(path);
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXTENSION) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let name = relative
                .with_extension("")
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(".");
            if !name.contains(NESTING_MARKER) {
                classes.push(name);
            }
        }
    }

    classes.sort();
    classes
}

fn has_extension(name: &str, extension: &str) -> bool {
    Path::new(name).extension().and_then(|e| e.to_str()) == Some(extension)
}
