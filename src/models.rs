//! Model provisioning: METEOR resources plus load-or-download of the learned
//! metric models.
//!
//! A model identifier is either a local directory holding the artefacts or a
//! hub repository id. Hub artefacts are cached under `EvalConfig::cache_dir`
//! and only fetched when missing, so provisioning twice is cheap.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::comet::QualityModel;
use crate::config::{EvalConfig, Metric};
use crate::error::ModelError;
use crate::meteor::{MeteorResources, SynonymTable};
use crate::utils::ComputeDevice;

pub const MODEL_FILE: &str = "model.pt";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
const ARTEFACTS: [&str; 2] = [MODEL_FILE, TOKENIZER_FILE];

/// Everything the evaluator needs to score, loaded once per run.
pub struct Models {
    pub comet: Option<Box<dyn QualityModel>>,
    pub comet_qe: Option<Box<dyn QualityModel>>,
    pub meteor: MeteorResources,
    pub device: ComputeDevice,
    /// Artefact directories the learned models were loaded from.
    pub artefact_dirs: Vec<PathBuf>,
}

impl Models {
    pub fn new(meteor: MeteorResources, device: ComputeDevice) -> Self {
        Self {
            comet: None,
            comet_qe: None,
            meteor,
            device,
            artefact_dirs: vec![],
        }
    }

    pub fn with_comet(mut self, model: Box<dyn QualityModel>) -> Self {
        self.comet = Some(model);
        self
    }

    pub fn with_comet_qe(mut self, model: Box<dyn QualityModel>) -> Self {
        self.comet_qe = Some(model);
        self
    }

    /// The learned model backing `metric`, if one is loaded.
    pub fn learned(&self, metric: Metric) -> Option<&dyn QualityModel> {
        match metric {
            Metric::Comet => self.comet.as_deref(),
            Metric::CometQe => self.comet_qe.as_deref(),
            Metric::Bleu | Metric::Meteor => None,
        }
    }
}

/// Directory name used for a hub id inside the cache.
fn cache_key(id: &str) -> String {
    id.replace('/', "--")
}

async fn load_meteor_resources(cfg: &EvalConfig) -> Result<MeteorResources, ModelError> {
    let synonyms = match &cfg.meteor.synonyms {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ModelError::Lexicon {
                    path: path.clone(),
                    source,
                })?;
            let table = SynonymTable::parse(&text);
            info!(path = %path.display(), words = table.len(), "loaded synonym lexicon");
            table
        }
        None => SynonymTable::default(),
    };
    Ok(MeteorResources::new(&cfg.meteor, synonyms)?)
}

async fn download(
    client: &reqwest::Client,
    id: &str,
    url: &str,
    target: &Path,
) -> Result<(), ModelError> {
    let download_err = |detail: String| ModelError::Download {
        id: id.to_string(),
        detail,
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| download_err(format!("{url}: {e}")))?;
    let status = response.status();
    if matches!(status.as_u16(), 401 | 403 | 404) {
        return Err(ModelError::NotFound {
            id: id.to_string(),
            detail: format!(
                "{url} returned {status}; the repository must host a TorchScript export, \
                 or point the model setting at a local export directory"
            ),
        });
    }
    if !status.is_success() {
        return Err(download_err(format!("{url} returned {status}")));
    }

    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = target.with_file_name(format!("{file_name}.part"));
    let streamed = async {
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| download_err(format!("{}: {e}", partial.display())))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| download_err(format!("{url}: {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| download_err(format!("{}: {e}", partial.display())))?;
        }
        file.flush()
            .await
            .map_err(|e| download_err(format!("{}: {e}", partial.display())))?;
        drop(file);
        tokio::fs::rename(&partial, target)
            .await
            .map_err(|e| download_err(format!("{}: {e}", target.display())))
    }
    .await;

    if streamed.is_err() {
        // Never leave a truncated artefact behind for the next run.
        if let Err(e) = tokio::fs::remove_file(&partial).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %partial.display(), error = %e, "could not remove partial download");
            }
        }
    }
    streamed
}

/// Resolve `id` to a directory holding every artefact, downloading what is missing.
pub async fn fetch_model(
    client: &reqwest::Client,
    cfg: &EvalConfig,
    id: &str,
) -> Result<PathBuf, ModelError> {
    let local = Path::new(id);
    if local.is_dir() {
        if let Some(missing) = ARTEFACTS.iter().find(|f| !local.join(f).is_file()) {
            return Err(ModelError::NotFound {
                id: id.to_string(),
                detail: format!("{} has no {missing}", local.display()),
            });
        }
        debug!(id, "using local model directory");
        return Ok(local.to_path_buf());
    }

    let dir = cfg.cache_dir().join(cache_key(id));
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| ModelError::Download {
            id: id.to_string(),
            detail: format!("{}: {e}", dir.display()),
        })?;

    for artefact in ARTEFACTS {
        let target = dir.join(artefact);
        if target.is_file() {
            debug!(id, artefact, "already cached");
            continue;
        }
        let url = format!(
            "{}/{id}/resolve/main/{artefact}",
            cfg.hub_endpoint.trim_end_matches('/')
        );
        info!(id, artefact, "downloading");
        download(client, id, &url, &target).await?;
    }
    Ok(dir)
}

#[cfg(feature = "comet")]
fn load_model(
    id: &str,
    dir: &Path,
    device: ComputeDevice,
) -> Result<Box<dyn QualityModel>, ModelError> {
    Ok(Box::new(crate::torch_model::CometModel::load(id, dir, device)?))
}

#[cfg(not(feature = "comet"))]
fn load_model(
    id: &str,
    _dir: &Path,
    _device: ComputeDevice,
) -> Result<Box<dyn QualityModel>, ModelError> {
    Err(backend_missing(id))
}

fn backend_missing(id: &str) -> ModelError {
    ModelError::Incompatible {
        id: id.to_string(),
        detail: "built without the `comet` feature; rebuild with `--features comet` \
                 or drop COMET and COMET_QE from `metrics`"
            .to_string(),
    }
}

/// Load METEOR resources and every requested learned model.
pub async fn provision(cfg: &EvalConfig) -> Result<Models, ModelError> {
    let learned: Vec<(Metric, &str)> = [
        (Metric::Comet, cfg.comet_model.as_str()),
        (Metric::CometQe, cfg.comet_qe_model.as_str()),
    ]
    .into_iter()
    .filter(|(metric, _)| cfg.requests(*metric))
    .collect();

    if let Some((_, id)) = learned.first() {
        if !cfg!(feature = "comet") {
            return Err(backend_missing(id));
        }
    }

    let device = ComputeDevice::detect(cfg.use_gpu);
    let meteor = load_meteor_resources(cfg).await?;

    let client = reqwest::Client::new();
    let dirs = futures::future::try_join_all(
        learned.iter().map(|(_, id)| fetch_model(&client, cfg, id)),
    )
    .await?;

    let mut models = Models::new(meteor, device);
    for ((metric, id), dir) in learned.into_iter().zip(dirs) {
        let handle = load_model(id, &dir, device)?;
        info!(%metric, id, "model loaded");
        match metric {
            Metric::Comet => models.comet = Some(handle),
            _ => models.comet_qe = Some(handle),
        }
        models.artefact_dirs.push(dir);
    }
    Ok(models)
}

/// `provision` on a private runtime, for synchronous callers.
pub fn provision_blocking(cfg: &EvalConfig) -> Result<Models, ModelError> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ModelError::Incompatible {
            id: "tokio".to_string(),
            detail: format!("failed to create async runtime: {e}"),
        })?;
    rt.block_on(provision(cfg))
}
