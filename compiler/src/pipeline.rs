// pipeline.rs — Compilation state and stage orchestration
//
// Holds the artifacts of each stage (loaded tree, generated sections,
// stitched text) and runs the stages in order up to a requested terminal
// stage, stopping at the first stage that reports an error.
//
// Preconditions: `source` is the JSON text of a program tree.
// Postconditions: all artifacts for the executed stages are populated, or
//                 `has_error` is set.
// Failure modes: any stage emitting error-level diagnostics.
// Side effects: calls `on_stage_complete` after each stage for immediate
//               display.

use std::time::Instant;

use crate::ast::Program;
use crate::diag::Diagnostic;
use crate::generate::{GeneratedProgram, GeneratorOptions};
use crate::templates::Templates;

// ── Stages ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Load,
    Generate,
    Stitch,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Generate => "generate",
            Stage::Stitch => "stitch",
        }
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for reproducible builds and cache-key use.
///
/// `source_hash`: SHA-256 of the raw tree JSON.
/// `options_fingerprint`: SHA-256 of the options serialized as compact JSON.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub options_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    pub fn options_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.options_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"source_hash\": \"{}\",\n  \"options_fingerprint\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.source_hash_hex(),
            self.options_fingerprint_hex(),
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from the tree text and generator options.
pub fn compute_provenance(source: &str, options: &GeneratorOptions) -> Provenance {
    let canonical = serde_json::to_string(options).unwrap_or_default();
    Provenance {
        source_hash: sha256(source.as_bytes()),
        options_fingerprint: sha256(canonical.as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── State ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub generator: GeneratorOptions,
    /// Target template text; stitching runs only when set.
    pub template: Option<String>,
    pub verbose: bool,
}

/// Holds all compilation artifacts and accumulated diagnostics.
#[derive(Debug, Default)]
pub struct CompilationState {
    pub program: Option<Program>,
    pub generated: Option<GeneratedProgram>,
    pub stitched: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Pipeline execution failed due to error-level diagnostics in a stage.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    pub failing_stage: Stage,
}

/// Per-stage post-processing: callback, accumulate, verbose, error check.
fn finish_stage(
    state: &mut CompilationState,
    stage: Stage,
    diags: Vec<Diagnostic>,
    elapsed: std::time::Duration,
    verbose: bool,
    on_stage_complete: &mut impl FnMut(Stage, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_stage_complete(stage, &diags);
    let is_err = diags.iter().any(Diagnostic::is_error);
    state.diagnostics.extend(diags);
    if verbose {
        log::info!(
            "{} complete, {:.1}ms",
            stage.name(),
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_stage: stage,
        });
    }
    Ok(())
}

// ── Orchestration ──────────────────────────────────────────────────────────

/// Run every stage up to and including `terminal`. Stitching is skipped
/// when no template was given.
pub fn run_pipeline(
    state: &mut CompilationState,
    source: &str,
    templates: &dyn Templates,
    options: &CompileOptions,
    terminal: Stage,
    on_stage_complete: &mut impl FnMut(Stage, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let verbose = options.verbose;
    state.provenance = Some(compute_provenance(source, &options.generator));

    let t = Instant::now();
    let (program, diags) = match crate::ast::load_program(source) {
        Ok(p) => (Some(p), Vec::new()),
        Err(e) => (None, vec![e]),
    };
    state.program = program;
    finish_stage(state, Stage::Load, diags, t.elapsed(), verbose, on_stage_complete)?;
    if terminal == Stage::Load {
        return Ok(());
    }

    let t = Instant::now();
    let result = match &state.program {
        Some(program) => crate::generate::generate(program, templates, &options.generator),
        None => return Ok(()),
    };
    state.generated = result.generated;
    finish_stage(
        state,
        Stage::Generate,
        result.diagnostics,
        t.elapsed(),
        verbose,
        on_stage_complete,
    )?;
    if terminal == Stage::Generate {
        return Ok(());
    }

    if let (Some(template), Some(generated)) = (&options.template, &state.generated) {
        let t = Instant::now();
        let result = crate::stitch::stitch(template, generated);
        state.stitched = Some(result.text);
        finish_stage(
            state,
            Stage::Stitch,
            result.diagnostics,
            t.elapsed(),
            verbose,
            on_stage_complete,
        )?;
    }
    Ok(())
}

/// Run the whole pipeline, discarding per-stage callbacks.
pub fn compile(source: &str, templates: &dyn Templates, options: &CompileOptions) -> CompilationState {
    let mut state = CompilationState::new();
    let _ = run_pipeline(
        &mut state,
        source,
        templates,
        options,
        Stage::Stitch,
        &mut |_: Stage, _: &[Diagnostic]| {},
    );
    state
}
