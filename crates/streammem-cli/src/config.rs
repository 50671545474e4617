//! Run configuration – read from a TOML file, then `STREAMMEM_*` overrides.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! starting point.  [`RunConfig::validate`] runs before any frame and turns
//! every inconsistency into a [`StreamError::Config`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use streammem_dump::validate_tag;
use streammem_perception::PcRange;
use streammem_runtime::{HeadShape, RunnerConfig};
use streammem_types::StreamError;

/// Which inference unit drives the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// Deterministic stand-in fed by each frame's `proposals` tensor.
    #[default]
    Synthetic,
    /// Re-emit dumps tagged `replay_tag` found in each frame's `out/`.
    Replay,
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitKind::Synthetic => write!(f, "synthetic"),
            UnitKind::Replay => write!(f, "replay"),
        }
    }
}

/// Everything one verification run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Directory holding one subdirectory per frame.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    #[serde(default = "default_num_frames")]
    pub num_frames: usize,

    #[serde(default = "default_pre_capacity")]
    pub pre_capacity: usize,

    #[serde(default = "default_post_capacity")]
    pub post_capacity: usize,

    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,

    #[serde(default = "default_num_layers")]
    pub num_layers: usize,

    #[serde(default = "default_num_proposals")]
    pub num_proposals: usize,

    #[serde(default = "default_num_propagated")]
    pub num_propagated: usize,

    #[serde(default = "default_num_classes")]
    pub num_classes: usize,

    #[serde(default = "default_code_size")]
    pub code_size: usize,

    /// `[x_min, y_min, z_min, x_max, y_max, z_max]` in metres.
    #[serde(default = "default_pc_range")]
    pub pc_range: [f32; 6],

    /// Tag appended to every artifact this run writes.
    #[serde(default = "default_provenance_tag")]
    pub provenance_tag: String,

    #[serde(default)]
    pub unit: UnitKind,

    /// Tag of the dumps a replay run reads.
    #[serde(default = "default_replay_tag")]
    pub replay_tag: String,

    #[serde(default)]
    pub seed: u64,

    /// Request bit-reproducible execution.  The bundled units are always
    /// deterministic; the flag is recorded for units that are not.
    #[serde(default)]
    pub deterministic: bool,

    /// Run manifest location; defaults to `<data_root>/run_manifest.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,

    // ── Output selectors ─────────────────────────────────────────────────────
    /// Write per-frame artifact dumps.
    #[serde(default = "default_true")]
    pub dump: bool,

    /// Results file (`.pkl` / `.pickle`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<PathBuf>,

    /// Evaluation metrics to compute.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub eval: Vec<String>,

    #[serde(default)]
    pub format_only: bool,

    #[serde(default)]
    pub show: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_dir: Option<PathBuf>,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data/frames")
}
fn default_num_frames() -> usize {
    20
}
fn default_pre_capacity() -> usize {
    512
}
fn default_post_capacity() -> usize {
    640
}
fn default_hidden_dim() -> usize {
    256
}
fn default_num_layers() -> usize {
    6
}
fn default_num_proposals() -> usize {
    300
}
fn default_num_propagated() -> usize {
    128
}
fn default_num_classes() -> usize {
    10
}
fn default_code_size() -> usize {
    10
}
fn default_pc_range() -> [f32; 6] {
    [-51.2, -51.2, -5.0, 51.2, 51.2, 3.0]
}
fn default_provenance_tag() -> String {
    "rs".to_string()
}
fn default_replay_tag() -> String {
    "pth".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            num_frames: default_num_frames(),
            pre_capacity: default_pre_capacity(),
            post_capacity: default_post_capacity(),
            hidden_dim: default_hidden_dim(),
            num_layers: default_num_layers(),
            num_proposals: default_num_proposals(),
            num_propagated: default_num_propagated(),
            num_classes: default_num_classes(),
            code_size: default_code_size(),
            pc_range: default_pc_range(),
            provenance_tag: default_provenance_tag(),
            unit: UnitKind::default(),
            replay_tag: default_replay_tag(),
            seed: 0,
            deterministic: false,
            manifest: None,
            dump: true,
            out: None,
            eval: Vec::new(),
            format_only: false,
            show: false,
            show_dir: None,
        }
    }
}

impl RunConfig {
    /// Reject anything that would make the run meaningless, before any frame.
    pub fn validate(&self) -> Result<(), StreamError> {
        let fail = |msg: String| Err(StreamError::Config(msg));

        if !(self.dump || self.out.is_some() || !self.eval.is_empty() || self.format_only || self.show)
            && self.show_dir.is_none()
        {
            return fail(
                "specify at least one output: `dump`, `out`, `eval`, `format_only`, `show` or `show_dir`".to_string(),
            );
        }
        if !self.eval.is_empty() && self.format_only {
            return fail("`eval` and `format_only` cannot both be set".to_string());
        }
        if let Some(out) = &self.out {
            let ext = out.extension().and_then(|e| e.to_str());
            if !matches!(ext, Some("pkl") | Some("pickle")) {
                return fail(format!("`out` must be a .pkl or .pickle file, got `{}`", out.display()));
            }
        }
        if self.pre_capacity == 0 {
            return fail("`pre_capacity` must be positive".to_string());
        }
        if self.post_capacity <= self.pre_capacity {
            return fail(format!(
                "`post_capacity` ({}) must exceed `pre_capacity` ({})",
                self.post_capacity, self.pre_capacity
            ));
        }
        if self.hidden_dim == 0 {
            return fail("`hidden_dim` must be positive".to_string());
        }
        if self.num_frames == 0 {
            return fail("`num_frames` must be positive".to_string());
        }
        if self.num_layers == 0 || self.num_classes == 0 || self.code_size == 0 {
            return fail("`num_layers`, `num_classes` and `code_size` must be positive".to_string());
        }
        if !self.pc_range().is_valid() {
            return fail(format!("`pc_range` {:?} has an empty axis", self.pc_range));
        }
        validate_tag(&self.provenance_tag).map_err(|e| StreamError::Config(e.to_string()))?;
        if self.unit == UnitKind::Replay {
            validate_tag(&self.replay_tag).map_err(|e| StreamError::Config(e.to_string()))?;
            if self.replay_tag == self.provenance_tag {
                return fail(format!(
                    "`replay_tag` and `provenance_tag` are both `{}`; a replay would overwrite its own input",
                    self.provenance_tag
                ));
            }
        }
        Ok(())
    }

    pub fn pc_range(&self) -> PcRange {
        PcRange::from_flat(self.pc_range)
    }

    pub fn head(&self) -> HeadShape {
        HeadShape {
            num_layers: self.num_layers,
            num_proposals: self.num_proposals,
            num_propagated: self.num_propagated,
            num_classes: self.num_classes,
            code_size: self.code_size,
            hidden_dim: self.hidden_dim,
            pre_capacity: self.pre_capacity,
            post_capacity: self.post_capacity,
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.manifest
            .clone()
            .unwrap_or_else(|| self.data_root.join("run_manifest.json"))
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            head: self.head(),
            provenance_tag: self.provenance_tag.clone(),
            manifest_path: Some(self.manifest_path()),
        }
    }
}

/// Load a config file.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<RunConfig>, StreamError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| StreamError::Config(format!("failed to read config at {}: {e}", path.display())))?;
    let cfg: RunConfig = toml::from_str(&raw)
        .map_err(|e| StreamError::Config(format!("failed to parse config at {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `STREAMMEM_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `STREAMMEM_NUM_FRAMES` | `num_frames` |
/// | `STREAMMEM_DATA_ROOT` | `data_root` |
/// | `STREAMMEM_PROVENANCE_TAG` | `provenance_tag` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut RunConfig) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

/// [`apply_env_overrides`] with the variables read through `lookup`.
pub fn apply_overrides_from(cfg: &mut RunConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("STREAMMEM_NUM_FRAMES")
        && let Ok(n) = v.parse::<usize>()
    {
        cfg.num_frames = n;
    }
    if let Some(v) = lookup("STREAMMEM_DATA_ROOT") {
        cfg.data_root = PathBuf::from(v);
    }
    if let Some(v) = lookup("STREAMMEM_PROVENANCE_TAG") {
        cfg.provenance_tag = v;
    }
}

/// Write `cfg` as TOML, creating parent directories.
pub fn save_to(cfg: &RunConfig, path: &Path) -> Result<(), StreamError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| StreamError::Config(format!("failed to create {}: {e}", parent.display())))?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| StreamError::Config(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw).map_err(|e| StreamError::Config(format!("failed to write config at {}: {e}", path.display())))
}
